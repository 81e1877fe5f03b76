//! Discovery calls of the service, with error context.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::service::{LogGroup, LogService, LogStream};

/// Thin wrapper around the discovery half of a [`LogService`].
#[derive(Debug)]
pub struct Catalog<S> {
    service: Arc<S>,
}

impl<S> Clone for Catalog<S> {
    fn clone(&self) -> Self {
        Catalog {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: LogService> Catalog<S> {
    pub fn new(service: Arc<S>) -> Self {
        Catalog { service }
    }

    pub async fn groups(&self) -> Result<Vec<LogGroup>> {
        let groups = self
            .service
            .list_groups()
            .await
            .map_err(|source| Error::Discovery {
                what: "listing log groups".to_string(),
                source,
            })?;
        debug!(count = groups.len(), "listed log groups");

        Ok(groups)
    }

    pub async fn streams(&self, group: &LogGroup) -> Result<Vec<LogStream>> {
        let streams = self
            .service
            .list_streams(group)
            .await
            .map_err(|source| Error::Discovery {
                what: format!("listing streams of group '{}'", group),
                source,
            })?;
        debug!(group = %group, count = streams.len(), "listed log streams");

        Ok(streams)
    }
}
