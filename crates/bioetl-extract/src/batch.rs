//! Batch construction under count and URL-length constraints.
//!
//! Identifiers are grouped up to the source's batch size; any candidate
//! whose GET URL would exceed the length limit is split recursively. A
//! single identifier that still exceeds the limit is reissued as a
//! method-override POST with the `__in` filter in the body.

use bioetl_http::{HttpRequest, Method};

/// One planned batch with its prepared request.
#[derive(Debug, Clone)]
pub struct Batch {
    pub ids: Vec<String>,
    pub request: HttpRequest,
}

/// Planner for one source's list-filter endpoint.
#[derive(Debug, Clone)]
pub struct BatchPlanner {
    pub base_url: String,
    pub resource: String,
    pub filter_key: String,
    pub max_per_batch: usize,
    pub max_url_len: usize,
    pub page_limit: usize,
}

impl BatchPlanner {
    /// The endpoint URL: `{base}/{resource}.json`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}.json",
            self.base_url.trim_end_matches('/'),
            self.resource
        )
    }

    /// Build the GET request for a group of identifiers.
    #[must_use]
    pub fn get_request(&self, ids: &[String]) -> HttpRequest {
        HttpRequest::get(self.endpoint())
            .with_param(format!("{}__in", self.filter_key), ids.join(","))
            .with_param("limit", self.page_limit.to_string())
    }

    /// Build the method-override POST used when a size-1 batch still
    /// exceeds the URL length limit.
    #[must_use]
    pub fn override_request(&self, ids: &[String]) -> HttpRequest {
        HttpRequest::post_override(
            self.endpoint(),
            serde_json::json!({
                format!("{}__in", self.filter_key): ids.join(","),
                "limit": self.page_limit,
            }),
        )
    }

    /// Plan batches for the given identifiers.
    #[must_use]
    pub fn plan(&self, ids: &[String]) -> Vec<Batch> {
        let mut batches = Vec::new();
        for chunk in ids.chunks(self.max_per_batch.max(1)) {
            self.plan_chunk(chunk, &mut batches);
        }
        batches
    }

    fn plan_chunk(&self, ids: &[String], out: &mut Vec<Batch>) {
        if ids.is_empty() {
            return;
        }
        let request = self.get_request(&ids.to_vec());
        if request.full_url().len() <= self.max_url_len {
            out.push(Batch {
                ids: ids.to_vec(),
                request,
            });
            return;
        }
        if ids.len() == 1 {
            out.push(Batch {
                ids: ids.to_vec(),
                request: self.override_request(&ids.to_vec()),
            });
            return;
        }
        let mid = ids.len() / 2;
        self.plan_chunk(&ids[..mid], out);
        self.plan_chunk(&ids[mid..], out);
    }
}
