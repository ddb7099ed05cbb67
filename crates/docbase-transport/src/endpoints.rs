//! Endpoint URL construction (spec §6).

use url::Url;

/// Builds the fixed set of service URLs under a base, scoped to one
/// project.
///
/// The base is set once per [`crate::RequestEngine`] instance; swapping
/// it at runtime (e.g. to point tests at a local server) means building
/// a new engine rather than mutating process-wide state (spec §9).
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// Build an endpoint set rooted at `base`.
    pub fn new(base: Url) -> Self {
        Endpoints { base }
    }

    /// This endpoint set's base URL.
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn path(&self, project_id: &str, suffix: &str) -> Url {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .expect("base url must support path segments");
            segments.push("projects");
            segments.push(&format!("{project_id}{suffix}"));
        }
        url
    }

    /// `{base}/projects/{p}:lookup`
    pub fn lookup(&self, project_id: &str) -> Url {
        self.path(project_id, ":lookup")
    }

    /// `{base}/projects/{p}:commit`
    pub fn commit(&self, project_id: &str) -> Url {
        self.path(project_id, ":commit")
    }

    /// `{base}/projects/{p}:runQuery`
    pub fn run_query(&self, project_id: &str) -> Url {
        self.path(project_id, ":runQuery")
    }

    /// `{base}/projects/{p}:runAggregationQuery`
    pub fn run_aggregation_query(&self, project_id: &str) -> Url {
        self.path(project_id, ":runAggregationQuery")
    }

    /// `{base}/projects/{p}:beginTransaction`
    pub fn begin_transaction(&self, project_id: &str) -> Url {
        self.path(project_id, ":beginTransaction")
    }

    /// `{base}/projects/{p}:allocateIds`
    pub fn allocate_ids(&self, project_id: &str) -> Url {
        self.path(project_id, ":allocateIds")
    }

    /// `{base}/projects/{p}:rollback`
    pub fn rollback(&self, project_id: &str) -> Url {
        self.path(project_id, ":rollback")
    }
}

/// The value of the `X-Goog-Request-Params` routing header (spec §6),
/// sent when the client is bound to a named database.
pub fn routing_header_value(project_id: &str, database_id: &str) -> String {
    let mut out = url::form_urlencoded::Serializer::new(String::new());
    out.append_pair("project_id", project_id);
    out.append_pair("database_id", database_id);
    out.finish()
}
