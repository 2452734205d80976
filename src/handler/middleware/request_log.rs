use crate::handler::middleware::clientaddr::ClientAddr;
use crate::provider::signature::SIGNATURE_HEADER;
use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_LENGTH, header::USER_AGENT, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::{sync::Arc, time::Instant};
use tracing::field::{Field, Visit};
use tracing::info;
use tracing::Subscriber;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{format, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub const ACCESS_LOG_TARGET: &str = "http.access";

/// Event format that renders `http.access` events as one pipe-separated
/// line and everything else with the default formatter.
#[derive(Clone)]
pub struct AccessLogEventFormat<T = SystemTime> {
    timer: T,
}

impl<T> AccessLogEventFormat<T>
where
    T: FormatTime,
{
    pub fn new(timer: T) -> Self {
        Self { timer }
    }
}

impl<T> Default for AccessLogEventFormat<T>
where
    T: FormatTime + Default,
{
    fn default() -> Self {
        Self {
            timer: T::default(),
        }
    }
}

#[derive(Default, Debug)]
struct AccessLine {
    origin: Option<String>,
    method: Option<String>,
    status: Option<u16>,
    body_len: Option<String>,
    cost_ms: Option<f64>,
    uri: Option<String>,
    client_ip: Option<String>,
}

impl AccessLine {
    fn text(value: &Option<String>) -> &str {
        value.as_deref().unwrap_or("-")
    }

    fn status(&self) -> String {
        self.status
            .map(|value| value.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    fn cost(&self) -> String {
        self.cost_ms
            .map(|value| format!("{value:.3}ms"))
            .unwrap_or_else(|| "-".to_string())
    }

    fn set(&mut self, name: &str, value: String) {
        match name {
            "origin" => self.origin = Some(value),
            "method" => self.method = Some(value),
            "body_len" => self.body_len = Some(value),
            "uri" => self.uri = Some(value),
            "client_ip" => self.client_ip = Some(value),
            _ => {}
        }
    }

    fn render(&self) -> String {
        format!(
            "{} | {} | {} | {} | {} | {} | {}",
            Self::text(&self.client_ip),
            Self::text(&self.origin),
            Self::text(&self.method),
            self.status(),
            Self::text(&self.body_len),
            self.cost(),
            Self::text(&self.uri)
        )
    }
}

impl Visit for AccessLine {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        self.set(field.name(), rendered.trim_matches('"').to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "status" {
            self.status = Some(value as u16);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "status" {
            self.status = Some(value as u16);
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if field.name() == "cost_ms" {
            self.cost_ms = Some(value);
        }
    }
}

impl<S, N, T> FormatEvent<S, N> for AccessLogEventFormat<T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
    T: FormatTime + Clone,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != ACCESS_LOG_TARGET {
            return format::Format::default()
                .with_timer(self.timer.clone())
                .with_target(true)
                .with_source_location(false)
                .format_event(ctx, writer, event);
        }

        let mut line = AccessLine::default();
        event.record(&mut line);
        self.timer.format_time(&mut writer)?;
        writeln!(
            writer,
            " {} {} | {}",
            metadata.level(),
            metadata.target(),
            line.render()
        )
    }
}

fn should_skip_logging(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            path.starts_with(prefix)
        } else {
            path == pattern
        }
    })
}

/// `provider` for signed webhooks or the provider's proxy agent, `app`
/// otherwise.
fn request_origin(headers: &HeaderMap) -> &'static str {
    let from_proxy = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.starts_with("TwilioProxy"))
        .unwrap_or(false);
    if from_proxy || headers.contains_key(SIGNATURE_HEADER) {
        "provider"
    } else {
        "app"
    }
}

/// Logs one access line per request once the downstream handler returns.
pub async fn log_requests(
    State(skip_paths): State<Arc<Vec<String>>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().to_string();
    let request_path = req.uri().path().to_string();
    let origin = request_origin(req.headers());
    let connect_info = req
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0);
    let client_ip = ClientAddr::from_http_parts(req.headers(), connect_info)
        .ip()
        .to_string();

    let response = next.run(req).await;

    if should_skip_logging(&request_path, skip_paths.as_slice()) {
        return response;
    }
    let body_len = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    info!(
        target: "http.access",
        origin,
        method = method.as_str(),
        status = response.status().as_u16(),
        body_len = body_len.as_str(),
        cost_ms = started_at.elapsed().as_secs_f64() * 1_000.0,
        uri = uri.as_str(),
        client_ip = client_ip.as_str(),
    );
    response
}
