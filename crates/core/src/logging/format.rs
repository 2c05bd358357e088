use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

use super::scrub::scrub_urls;
use crate::config::LogFields;

/// One JSON object per line: `{"timestamp","level","fields":{...}}`.
///
/// Default fields are merged under the event's own fields, and the finished
/// line is scrubbed so no URL keeps its query string.
pub struct JsonLines {
  defaults: Map<String, Value>,
}

impl JsonLines {
  pub fn new(defaults: &LogFields) -> Self {
    let defaults = defaults
      .iter()
      .map(|(k, v)| (k.clone(), Value::String(v.clone())))
      .collect();
    Self { defaults }
  }
}

impl<S, N> FormatEvent<S, N> for JsonLines
where
  S: Subscriber + for<'a> LookupSpan<'a>,
  N: for<'a> FormatFields<'a> + 'static,
{
  fn format_event(
    &self,
    _ctx: &FmtContext<'_, S, N>,
    mut writer: Writer<'_>,
    event: &Event<'_>,
  ) -> fmt::Result {
    let mut fields = self.defaults.clone();
    event.record(&mut JsonVisitor(&mut fields));

    let mut line = Map::new();
    line.insert(
      "timestamp".into(),
      Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    line.insert(
      "level".into(),
      Value::String(event.metadata().level().to_string()),
    );
    line.insert("fields".into(), Value::Object(fields));

    let rendered = serde_json::to_string(&Value::Object(line)).map_err(|_| fmt::Error)?;
    writeln!(writer, "{}", scrub_urls(&rendered))
  }
}

struct JsonVisitor<'a>(&'a mut Map<String, Value>);

impl Visit for JsonVisitor<'_> {
  fn record_str(&mut self, field: &Field, value: &str) {
    self.0.insert(field.name().into(), Value::String(value.into()));
  }

  fn record_i64(&mut self, field: &Field, value: i64) {
    self.0.insert(field.name().into(), Value::from(value));
  }

  fn record_u64(&mut self, field: &Field, value: u64) {
    self.0.insert(field.name().into(), Value::from(value));
  }

  fn record_f64(&mut self, field: &Field, value: f64) {
    self.0.insert(field.name().into(), Value::from(value));
  }

  fn record_bool(&mut self, field: &Field, value: bool) {
    self.0.insert(field.name().into(), Value::Bool(value));
  }

  fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
    self
      .0
      .insert(field.name().into(), Value::String(value.to_string()));
  }

  fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
    self
      .0
      .insert(field.name().into(), Value::String(format!("{value:?}")));
  }
}
