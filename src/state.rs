use std::sync::Arc;
use std::time::Duration;

use crate::config::Args;
use crate::rate_limit::RateLimiter;
use crate::sinks::{EmailSink, LeadSink, SheetsSink, SinkError, Sinks, StoreSink};
use crate::store::DocumentStore;

// app's shared state, read-only after startup
pub struct AppState {
    pub rate_limiter: RateLimiter,
    pub sinks: Sinks,
    pub default_language: String,
    pub sink_timeout: Option<Duration>, // per sink, None waits forever
    pub max_body_bytes: usize,
}

impl AppState {
    // Wires the limiter and sinks around one store client
    pub fn from_args(args: &Args, store: Arc<dyn DocumentStore>) -> Result<Self, SinkError> {
        let rate_limiter =
            RateLimiter::new(Arc::clone(&store), &args.rate_limit_collection, args.rate_limit());

        let spreadsheet = args.sheets().map(|config| {
            Arc::new(SheetsSink::new(reqwest::Client::new(), config)) as Arc<dyn LeadSink>
        });
        let email = match args.mail() {
            Some(config) => Some(Arc::new(EmailSink::new(&config)?) as Arc<dyn LeadSink>),
            None => None,
        };
        let sinks = Sinks::new(
            Arc::new(StoreSink::new(store, &args.leads_collection)),
            spreadsheet,
            email,
        );

        Ok(Self {
            rate_limiter,
            sinks,
            default_language: args.default_language.clone(),
            sink_timeout: args.sink_timeout(),
            max_body_bytes: args.max_body_bytes,
        })
    }
}
