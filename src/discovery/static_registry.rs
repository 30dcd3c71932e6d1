//! Config-backed service registry.

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

use crate::config::schema::UpstreamServiceConfig;
use crate::discovery::{DiscoveryError, ServiceRegistry};

#[derive(Debug, Error)]
#[error("service {service_id} has invalid url {url}: {source}")]
pub struct BadServiceUrl {
    pub service_id: String,
    pub url: String,
    #[source]
    pub source: url::ParseError,
}

/// Registry whose contents come entirely from the gateway config. Lookups
/// are exact on `(service_id, tag)`; a tagged request never falls back to
/// untagged registrations.
pub struct StaticRegistry {
    entries: HashMap<(String, Option<String>), Vec<Url>>,
}

impl StaticRegistry {
    pub fn from_config(services: &[UpstreamServiceConfig]) -> Result<Self, BadServiceUrl> {
        let mut entries: HashMap<(String, Option<String>), Vec<Url>> = HashMap::new();
        for service in services {
            let slot = entries
                .entry((service.service_id.clone(), service.tag.clone()))
                .or_default();
            for raw in &service.urls {
                let url = raw.parse::<Url>().map_err(|source| BadServiceUrl {
                    service_id: service.service_id.clone(),
                    url: raw.clone(),
                    source,
                })?;
                slot.push(url);
            }
        }
        Ok(Self { entries })
    }

    pub fn service_count(&self) -> usize {
        self.entries.len()
    }
}

impl ServiceRegistry for StaticRegistry {
    fn resolve(
        &self,
        protocol: &str,
        service_id: &str,
        tag: Option<&str>,
    ) -> Result<Vec<Url>, DiscoveryError> {
        let key = (service_id.to_string(), tag.map(str::to_string));
        let urls = match self.entries.get(&key) {
            Some(urls) => urls
                .iter()
                .filter(|url| url.scheme() == protocol)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Ok(urls)
    }
}
