//! Replay recorded exchanges through a [`HookRegistry`].
//!
//! Each record names the mapping that served it. For every record the
//! mapping's state matcher is checked, the response body is rendered with
//! state reads, and then the mapping's listeners fire, in the order a live
//! server would run them.

use crate::config::StateConfig;
use crate::hooks::HookRegistry;
use crate::template::{Exchange, ExchangeRenderer, RequestData, ResponseData};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One recorded request/response pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayRecord {
    pub mapping: String,
    pub request: RequestData,
    #[serde(default)]
    pub response: ResponseData,
}

/// Counters for a replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub replayed: usize,
    pub skipped: usize,
    pub listener_failures: usize,
    pub read_failures: usize,
    /// Rendered response bodies, in record order, for replayed records
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bodies: Vec<String>,
}

/// Parse a JSON array of [`ReplayRecord`]s.
pub fn parse_records(json: &str) -> serde_json::Result<Vec<ReplayRecord>> {
    serde_json::from_str(json)
}

/// Run every record through `registry` in order.
pub fn replay(
    registry: &HookRegistry,
    config: &StateConfig,
    records: Vec<ReplayRecord>,
) -> ReplaySummary {
    let body_renderer = ExchangeRenderer::new(&config.templating.read_error_placeholder);
    let mut summary = ReplaySummary::default();

    for (n, record) in records.into_iter().enumerate() {
        let Some(mapping) = config.mapping(&record.mapping) else {
            warn!("Record #{}: unknown mapping '{}', skipping", n, record.mapping);
            summary.skipped += 1;
            continue;
        };

        let mut exchange = Exchange::new(record.request, record.response);
        if let Some(pattern) = &mapping.path_pattern {
            exchange.request.extract_path_params(pattern);
        }

        match registry.matches(&mapping.id, &exchange) {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    "Record #{}: state matcher of '{}' did not match, skipping",
                    n, mapping.id
                );
                summary.skipped += 1;
                continue;
            }
            Err(err) => {
                warn!("Record #{}: state matcher of '{}' failed: {}", n, mapping.id, err);
                summary.skipped += 1;
                continue;
            }
        }

        match body_renderer.render_with_state(
            &exchange.response.body,
            &exchange,
            registry.store().as_ref(),
        ) {
            Ok(rendered) => {
                for failure in &rendered.failures {
                    warn!("Record #{}: state read failed: {}", n, failure);
                }
                summary.read_failures += rendered.failures.len();
                exchange.response.body = rendered.body;
            }
            Err(err) => {
                warn!("Record #{}: response body not rendered: {}", n, err);
                summary.read_failures += 1;
                exchange.response.body = body_renderer.read_error_text(&err);
            }
        }

        let report = registry.on_exchange(&mapping.id, &exchange);
        summary.listener_failures += report.failures().count();
        summary.replayed += 1;
        summary.bodies.push(exchange.response.body);
    }

    info!(
        "Replayed {} record(s), skipped {}, {} listener failure(s)",
        summary.replayed, summary.skipped, summary.listener_failures
    );
    summary
}
