//! Volunteer (helper) records.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::models::helper::{CreateHelperRequest, Helper, UpdateHelperRequest, HELPERS_COLLECTION};
use crate::store::{query_all, DocumentStore, QueryFilter, StoreError};
use crate::utils::clock::Clock;
use crate::validation::{self, Pipeline, ValidationError};

const PAGE_SIZE: usize = 500;

#[derive(thiserror::Error, Debug)]
pub enum HelperError {
    #[error("Helper with ID {0} not found")]
    NotFound(String),

    #[error("Helper with Parkrun ID {0} already exists")]
    DuplicateParkrunId(String),

    #[error("Validation failed: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

struct Pipelines {
    name: Pipeline<String>,
    parkrun_id: Pipeline<String>,
    email: Pipeline<String>,
    phone: Pipeline<String>,
}

impl Pipelines {
    fn new() -> Self {
        Self {
            name: Pipeline::new("name")
                .then(validation::trim_whitespace)
                .then(validation::require_non_empty)
                .then(validation::reject_unsafe_html)
                .then(validation::capitalize_words),
            parkrun_id: Pipeline::new("parkrunId")
                .then(validation::trim_whitespace)
                .then(validation::require_non_empty)
                .then(validation::parkrun_id_format),
            email: Pipeline::new("email").then(validation::normalize_email),
            phone: Pipeline::new("phone")
                .then(validation::reject_unsafe_html)
                .then(validation::normalize_phone),
        }
    }
}

/// Runs `value` through `pipeline` when present, collecting any error.
fn check(
    pipeline: &Pipeline<String>,
    value: Option<String>,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    match pipeline.run(value?) {
        Ok(v) => Some(v),
        Err(e) => {
            errors.push(e);
            None
        }
    }
}

pub struct HelperService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    pipelines: Pipelines,
}

impl HelperService {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            pipelines: Pipelines::new(),
        }
    }

    pub async fn list(&self) -> Result<Vec<Helper>, HelperError> {
        query_all(self.store.as_ref(), HELPERS_COLLECTION, &QueryFilter::default(), PAGE_SIZE)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    pub async fn get(&self, id: &str) -> Result<Helper, HelperError> {
        match self.store.read(HELPERS_COLLECTION, id).await? {
            Some(doc) => from_document(doc),
            None => Err(HelperError::NotFound(id.to_string())),
        }
    }

    pub async fn find_by_parkrun_id(&self, parkrun_id: &str) -> Result<Vec<Helper>, HelperError> {
        let parkrun_id = parkrun_id.trim().to_uppercase();
        let filter = QueryFilter::field_equals("parkrunId", json!(parkrun_id));
        query_all(self.store.as_ref(), HELPERS_COLLECTION, &filter, PAGE_SIZE)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    pub async fn create(
        &self,
        request: CreateHelperRequest,
        user_id: &str,
    ) -> Result<Helper, HelperError> {
        let mut errors = Vec::new();
        let name = check(&self.pipelines.name, Some(request.name), &mut errors);
        let parkrun_id = check(&self.pipelines.parkrun_id, Some(request.parkrun_id), &mut errors);
        let email = check(&self.pipelines.email, request.email, &mut errors);
        let phone = check(&self.pipelines.phone, request.phone, &mut errors);
        let (Some(name), Some(parkrun_id), true) = (name, parkrun_id, errors.is_empty()) else {
            return Err(HelperError::Invalid(errors));
        };

        self.ensure_parkrun_id_free(&parkrun_id, None).await?;

        let now = self.clock.now();
        let helper = Helper {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            parkrun_id,
            email,
            phone,
            created_at: now,
            updated_at: now,
            created_by: user_id.to_string(),
        };
        let stored = self.store.upsert(HELPERS_COLLECTION, to_document(&helper)?).await?;
        info!(helper_id = %helper.id, created_by = %user_id, "Helper created");
        from_document(stored)
    }

    pub async fn update(
        &self,
        id: &str,
        request: UpdateHelperRequest,
        user_id: &str,
    ) -> Result<Helper, HelperError> {
        let mut helper = self.get(id).await?;

        let mut errors = Vec::new();
        let name = check(&self.pipelines.name, request.name, &mut errors);
        let parkrun_id = check(&self.pipelines.parkrun_id, request.parkrun_id, &mut errors);
        let email = check(&self.pipelines.email, request.email, &mut errors);
        let phone = check(&self.pipelines.phone, request.phone, &mut errors);
        if !errors.is_empty() {
            return Err(HelperError::Invalid(errors));
        }

        if let Some(parkrun_id) = parkrun_id {
            self.ensure_parkrun_id_free(&parkrun_id, Some(id)).await?;
            helper.parkrun_id = parkrun_id;
        }
        if let Some(name) = name {
            helper.name = name;
        }
        if email.is_some() {
            helper.email = email;
        }
        if phone.is_some() {
            helper.phone = phone;
        }
        helper.updated_at = self.clock.now();

        let stored = self.store.upsert(HELPERS_COLLECTION, to_document(&helper)?).await?;
        info!(helper_id = %id, updated_by = %user_id, "Helper updated");
        from_document(stored)
    }

    pub async fn delete(&self, id: &str) -> Result<(), HelperError> {
        if self.store.delete(HELPERS_COLLECTION, id).await? {
            info!(helper_id = %id, "Helper deleted");
            Ok(())
        } else {
            Err(HelperError::NotFound(id.to_string()))
        }
    }

    async fn ensure_parkrun_id_free(
        &self,
        parkrun_id: &str,
        own_id: Option<&str>,
    ) -> Result<(), HelperError> {
        let filter = QueryFilter::field_equals("parkrunId", json!(parkrun_id));
        let holders = query_all(self.store.as_ref(), HELPERS_COLLECTION, &filter, PAGE_SIZE).await?;
        let taken = holders
            .iter()
            .any(|doc| doc.get("id").and_then(Value::as_str) != own_id);
        if taken {
            Err(HelperError::DuplicateParkrunId(parkrun_id.to_string()))
        } else {
            Ok(())
        }
    }
}

fn to_document(helper: &Helper) -> Result<Value, HelperError> {
    serde_json::to_value(helper).map_err(|e| HelperError::Store(e.into()))
}

fn from_document(doc: Value) -> Result<Helper, HelperError> {
    serde_json::from_value(doc).map_err(|e| HelperError::Store(e.into()))
}
