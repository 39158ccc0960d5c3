//! Filter records supplied by list screens.

use crate::cache::{ParamValue, QueryParams};
use crate::domain::types::{ApplicationStatus, HospitalId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationFilter {
    pub status: Option<ApplicationStatus>,
    pub page_size: Option<u32>,
}

impl ApplicationFilter {
    pub fn with_status(status: ApplicationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

impl QueryParams for ApplicationFilter {
    fn query_params(&self) -> Vec<(&'static str, Option<ParamValue>)> {
        vec![
            ("status", self.status.map(|status| ParamValue::from(status.as_str()))),
            ("page_size", self.page_size.map(ParamValue::from)),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub hospital_id: Option<HospitalId>,
    pub bookmarked_only: bool,
    pub keyword: Option<String>,
}

impl QueryParams for JobFilter {
    fn query_params(&self) -> Vec<(&'static str, Option<ParamValue>)> {
        vec![
            ("hospital_id", self.hospital_id.map(|id| ParamValue::Int(id.0))),
            ("bookmarked", self.bookmarked_only.then_some(ParamValue::Bool(true))),
            (
                "keyword",
                self.keyword
                    .as_deref()
                    .map(str::trim)
                    .filter(|keyword| !keyword.is_empty())
                    .map(|keyword| ParamValue::Str(keyword.to_lowercase())),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{QueryKey, Resource, Scope};

    #[test]
    fn unset_filters_produce_the_bare_list_key() {
        let key = QueryKey::application_list(&ApplicationFilter::default());
        assert_eq!(
            key,
            QueryKey::build(Resource::Application, Scope::List, Vec::<(String, ParamValue)>::new())
        );
    }

    #[test]
    fn status_filter_is_distinct() {
        let pending = QueryKey::application_list(&ApplicationFilter::with_status(
            ApplicationStatus::Pending,
        ));
        let all = QueryKey::application_list(&ApplicationFilter::default());
        assert_ne!(pending, all);
        assert_eq!(pending.to_string(), "application:list{status=pending}");
    }

    #[test]
    fn job_keyword_is_normalized() {
        let spaced = JobFilter {
            keyword: Some("  ICU Nurse ".to_string()),
            ..Default::default()
        };
        let plain = JobFilter {
            keyword: Some("icu nurse".to_string()),
            ..Default::default()
        };
        let blank = JobFilter {
            keyword: Some("   ".to_string()),
            ..Default::default()
        };

        assert_eq!(QueryKey::job_list(&spaced), QueryKey::job_list(&plain));
        assert_eq!(
            QueryKey::job_list(&blank),
            QueryKey::job_list(&JobFilter::default())
        );
    }
}
