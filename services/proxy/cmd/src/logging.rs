use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// ANSI color codes for console output
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths for alignment
const SERVICE_NAME_WIDTH: usize = 20;

/// Formats events as `[timestamp] [service] [level] message`.
///
/// Events carrying a `component` field are attributed to
/// `proxy-<component>` instead of the service name.
pub struct ProxyLogFormatter {
    service_name: String,
    color_enabled: bool,
}

impl ProxyLogFormatter {
    pub fn new(service_name: String) -> Self {
        let color_enabled = is_terminal();
        Self {
            service_name,
            color_enabled,
        }
    }

    fn format_service_name(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(comp) => format!("proxy-{}", comp),
            None => self.service_name.clone(),
        };

        if name.chars().count() > SERVICE_NAME_WIDTH {
            let truncated: String = name.chars().take(SERVICE_NAME_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SERVICE_NAME_WIDTH)
        }
    }

    /// Level label padded to a fixed column, and its colour
    fn level_style(&self, level: &tracing::Level) -> (&'static str, &'static str) {
        let (label, color) = match *level {
            tracing::Level::ERROR => ("✗ ERROR  ", COLOR_BRIGHT_RED),
            tracing::Level::WARN => ("⚠ WARN   ", COLOR_BRIGHT_YELLOW),
            tracing::Level::INFO => ("ℹ INFO   ", COLOR_GREEN),
            tracing::Level::DEBUG => ("◦ DEBUG  ", COLOR_BRIGHT_GRAY),
            tracing::Level::TRACE => ("◦ TRACE  ", COLOR_BRIGHT_GRAY),
        };
        (label, if self.color_enabled { color } else { "" })
    }
}

impl<S, N> FormatEvent<S, N> for ProxyLogFormatter
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
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let level = event.metadata().level();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let service = self.format_service_name(visitor.component.as_deref());
        let (label, color) = self.level_style(level);
        let reset_color = if self.color_enabled { COLOR_RESET } else { "" };
        let cyan_color = if self.color_enabled { COLOR_CYAN } else { "" };

        write!(
            writer,
            "{}[{}] [{}] [{}{}{}] ",
            cyan_color, timestamp, service, color, label, reset_color
        )?;
        writeln!(writer, "{}{}", visitor.message, reset_color)
    }
}

/// Pulls `message` and `component` out of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => {}
        }
    }
}

/// Colour only when writing to a terminal that understands it
fn is_terminal() -> bool {
    if std::env::var("TERM").unwrap_or_default() == "dumb" {
        return false;
    }
    std::io::stdout().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> ProxyLogFormatter {
        ProxyLogFormatter {
            service_name: "junos-proxy".to_string(),
            color_enabled: false,
        }
    }

    #[test]
    fn test_service_name_column() {
        let formatter = formatter();

        let plain = formatter.format_service_name(None);
        assert_eq!(plain.len(), SERVICE_NAME_WIDTH);
        assert!(plain.starts_with("junos-proxy "));

        let component = formatter.format_service_name(Some("keepalive"));
        assert!(component.starts_with("proxy-keepalive"));
    }

    #[test]
    fn test_long_service_name_truncated() {
        let formatter = formatter();
        let name = formatter.format_service_name(Some("a-very-long-component-name"));
        assert_eq!(name.chars().count(), SERVICE_NAME_WIDTH);
        assert!(name.ends_with('…'));
    }

    #[test]
    fn test_level_column() {
        let formatter = formatter();
        let (error, color) = formatter.level_style(&tracing::Level::ERROR);
        let (info, _) = formatter.level_style(&tracing::Level::INFO);

        assert_eq!(color, "");
        assert_eq!(error.chars().count(), info.chars().count());
    }
}
