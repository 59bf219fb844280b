//! Argument validation. Pure: nothing here touches a browser.

use crate::catalog::{ParamKind, ParamSpec, ParamType, ToolDescriptor, ToolId};
use crate::content::ContentFormat;
use browser_mcp_core::config::TimeoutConfig;
use browser_mcp_core::{Error, Result};
use serde_json::{Map, Value};
use std::time::Duration;

pub const MAX_SELECTOR_LEN: usize = 1000;
pub const MAX_PATH_LEN: usize = 500;

#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub max_timeout: Duration,
    /// Used by `wait_for_element` when the caller omits `timeout`.
    pub default_wait: Duration,
}

impl From<&TimeoutConfig> for ValidationLimits {
    fn from(timeouts: &TimeoutConfig) -> Self {
        let max_timeout = timeouts.max_timeout();
        Self {
            max_timeout,
            default_wait: timeouts.default_timeout().min(max_timeout),
        }
    }
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

/// Normalized arguments, one variant per tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolArgs {
    NavigateToUrl {
        url: String,
    },
    GetPageContent {
        format: ContentFormat,
    },
    GetPageTitle,
    ClickElement {
        selector: String,
        timeout: Option<Duration>,
    },
    FillInput {
        selector: String,
        text: String,
        timeout: Option<Duration>,
    },
    WaitForElement {
        selector: String,
        timeout: Duration,
    },
    ExecuteJavascript {
        script: String,
    },
    TakeScreenshot {
        path: String,
        full_page: bool,
    },
    GetElementText {
        selector: String,
        timeout: Option<Duration>,
    },
    GetElementAttribute {
        selector: String,
        attribute: String,
        timeout: Option<Duration>,
    },
}

/// A checked parameter value.
#[derive(Debug, Clone)]
enum Checked {
    Str(String),
    Duration(Duration),
    Bool(bool),
    Format(ContentFormat),
}

struct Fields {
    values: Vec<(&'static str, Checked)>,
}

impl Fields {
    fn get(&self, name: &str) -> Option<&Checked> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    fn string(&self, name: &str) -> Result<String> {
        match self.get(name) {
            Some(Checked::Str(s)) => Ok(s.clone()),
            _ => Err(Error::invalid_argument(name, "is required")),
        }
    }

    fn duration(&self, name: &str) -> Option<Duration> {
        match self.get(name) {
            Some(Checked::Duration(d)) => Some(*d),
            _ => None,
        }
    }

    fn flag(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(Checked::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    fn format(&self, name: &str) -> Option<ContentFormat> {
        match self.get(name) {
            Some(Checked::Format(f)) => Some(*f),
            _ => None,
        }
    }
}

/// Check `raw` against `descriptor`, apply defaults and build typed arguments.
///
/// Parameters are checked in declared order and the first failure is
/// reported. Unknown extra fields are ignored.
pub fn validate(
    descriptor: &ToolDescriptor,
    raw: Option<&Value>,
    limits: &ValidationLimits,
) -> Result<ToolArgs> {
    let empty = Map::new();
    let args = match raw {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(Error::invalid_argument(
                "arguments",
                format!("must be an object, got {}", json_type(other)),
            ))
        }
    };

    let mut fields = Fields { values: Vec::new() };
    for spec in &descriptor.params {
        let value = match args.get(spec.name) {
            // Omitted timeouts come from the configured limits, not the schema default.
            Some(Value::Null) | None if is_timeout(spec.kind) => continue,
            Some(Value::Null) | None => match &spec.default {
                Some(default) => default.clone(),
                None if spec.required => {
                    return Err(Error::invalid_argument(spec.name, "is required"))
                }
                None => continue,
            },
            Some(v) => v.clone(),
        };
        fields.values.push((spec.name, check_param(spec, &value, limits)?));
    }

    build(descriptor.id, &fields, limits)
}

fn is_timeout(kind: ParamKind) -> bool {
    matches!(kind, ParamKind::TimeoutSecs | ParamKind::TimeoutMs)
}

fn check_param(spec: &ParamSpec, value: &Value, limits: &ValidationLimits) -> Result<Checked> {
    let name = spec.name;
    match spec.ty {
        ParamType::String => {
            let s = value.as_str().ok_or_else(|| {
                Error::invalid_argument(name, format!("must be a string, got {}", json_type(value)))
            })?;
            if s.trim().is_empty() {
                return Err(Error::invalid_argument(name, "must not be empty"));
            }
            check_string(spec, s)
        }
        ParamType::Integer | ParamType::Number => {
            let n = as_number(value).ok_or_else(|| {
                Error::invalid_argument(name, format!("must be a number, got {}", json_type(value)))
            })?;
            if spec.ty == ParamType::Integer && n.fract() != 0.0 {
                return Err(Error::invalid_argument(name, "must be a whole number"));
            }
            if !n.is_finite() || n <= 0.0 {
                return Err(Error::invalid_argument(name, "must be positive"));
            }
            let millis = match spec.kind {
                ParamKind::TimeoutSecs => n * 1000.0,
                _ => n,
            };
            let max_ms = limits.max_timeout.as_millis() as f64;
            if millis > max_ms {
                return Err(Error::invalid_argument(
                    name,
                    format!("exceeds the maximum of {}ms", limits.max_timeout.as_millis()),
                ));
            }
            Ok(Checked::Duration(Duration::from_secs_f64(millis / 1000.0)))
        }
        ParamType::Boolean => as_bool(value).map(Checked::Bool).ok_or_else(|| {
            Error::invalid_argument(name, format!("must be a boolean, got {}", json_type(value)))
        }),
    }
}

fn check_string(spec: &ParamSpec, s: &str) -> Result<Checked> {
    let name = spec.name;
    match spec.kind {
        ParamKind::Url => {
            let parsed = url::Url::parse(s.trim())
                .map_err(|e| Error::invalid_argument(name, format!("not a valid absolute URL: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::invalid_argument(
                    name,
                    format!("scheme '{}' is not allowed, use http or https", parsed.scheme()),
                ));
            }
            if parsed.host_str().map_or(true, str::is_empty) {
                return Err(Error::invalid_argument(name, "must include a host"));
            }
            Ok(Checked::Str(s.trim().to_string()))
        }
        ParamKind::Selector => {
            if s.chars().count() > MAX_SELECTOR_LEN {
                return Err(Error::invalid_argument(
                    name,
                    format!("longer than {} characters", MAX_SELECTOR_LEN),
                ));
            }
            Ok(Checked::Str(s.trim().to_string()))
        }
        ParamKind::Path => {
            if s.chars().count() >= MAX_PATH_LEN {
                return Err(Error::invalid_argument(
                    name,
                    format!("must be shorter than {} characters", MAX_PATH_LEN),
                ));
            }
            Ok(Checked::Str(s.to_string()))
        }
        ParamKind::Format => s.parse::<ContentFormat>().map(Checked::Format),
        ParamKind::AttributeName => Ok(Checked::Str(s.trim().to_string())),
        _ => Ok(Checked::Str(s.to_string())),
    }
}

fn build(id: ToolId, f: &Fields, limits: &ValidationLimits) -> Result<ToolArgs> {
    Ok(match id {
        ToolId::NavigateToUrl => ToolArgs::NavigateToUrl {
            url: f.string("url")?,
        },
        ToolId::GetPageContent => ToolArgs::GetPageContent {
            format: f.format("format").unwrap_or_default(),
        },
        ToolId::GetPageTitle => ToolArgs::GetPageTitle,
        ToolId::ClickElement => ToolArgs::ClickElement {
            selector: f.string("selector")?,
            timeout: f.duration("timeout_ms"),
        },
        ToolId::FillInput => ToolArgs::FillInput {
            selector: f.string("selector")?,
            text: f.string("text")?,
            timeout: f.duration("timeout_ms"),
        },
        ToolId::WaitForElement => ToolArgs::WaitForElement {
            selector: f.string("selector")?,
            timeout: f
                .duration("timeout")
                .unwrap_or(limits.default_wait),
        },
        ToolId::ExecuteJavascript => ToolArgs::ExecuteJavascript {
            script: f.string("script")?,
        },
        ToolId::TakeScreenshot => ToolArgs::TakeScreenshot {
            path: f.string("path")?,
            full_page: f.flag("full_page").unwrap_or(true),
        },
        ToolId::GetElementText => ToolArgs::GetElementText {
            selector: f.string("selector")?,
            timeout: f.duration("timeout_ms"),
        },
        ToolId::GetElementAttribute => ToolArgs::GetElementAttribute {
            selector: f.string("selector")?,
            attribute: f.string("attribute")?,
            timeout: f.duration("timeout_ms"),
        },
    })
}

/// Numbers, or strings holding numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
