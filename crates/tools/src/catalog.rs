//! Tool catalog: one immutable descriptor per exposed tool.

use browser_mcp_core::{Error, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Every tool the dispatcher knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolId {
    NavigateToUrl,
    GetPageContent,
    GetPageTitle,
    ClickElement,
    FillInput,
    WaitForElement,
    ExecuteJavascript,
    TakeScreenshot,
    GetElementText,
    GetElementAttribute,
}

impl ToolId {
    /// Catalog order.
    pub const ALL: [ToolId; 10] = [
        Self::NavigateToUrl,
        Self::GetPageContent,
        Self::GetPageTitle,
        Self::ClickElement,
        Self::FillInput,
        Self::WaitForElement,
        Self::ExecuteJavascript,
        Self::TakeScreenshot,
        Self::GetElementText,
        Self::GetElementAttribute,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NavigateToUrl => "navigate_to_url",
            Self::GetPageContent => "get_page_content",
            Self::GetPageTitle => "get_page_title",
            Self::ClickElement => "click_element",
            Self::FillInput => "fill_input",
            Self::WaitForElement => "wait_for_element",
            Self::ExecuteJavascript => "execute_javascript",
            Self::TakeScreenshot => "take_screenshot",
            Self::GetElementText => "get_element_text",
            Self::GetElementAttribute => "get_element_attribute",
        }
    }

    /// Only listed when `tools.extended` is on.
    pub fn is_extended(&self) -> bool {
        matches!(self, Self::GetElementText | Self::GetElementAttribute)
    }
}

/// JSON type of a parameter as advertised in `inputSchema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// What a parameter means, which decides how it is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Url,
    Selector,
    Text,
    Script,
    Path,
    Format,
    AttributeName,
    TimeoutSecs,
    TimeoutMs,
    Flag,
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ParamSpec {
    fn required(name: &'static str, ty: ParamType, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            ty,
            kind,
            required: true,
            default: None,
            description,
        }
    }

    fn optional(
        name: &'static str,
        ty: ParamType,
        kind: ParamKind,
        default: Option<Value>,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            ty,
            kind,
            required: false,
            default,
            description,
        }
    }

    fn schema(&self) -> Value {
        let mut prop = json!({
            "type": self.ty.as_str(),
            "description": self.description,
        });
        if let Some(default) = &self.default {
            prop["default"] = default.clone();
        }
        if self.kind == ParamKind::Format {
            prop["enum"] = json!(["text", "html", "markdown"]);
        }
        prop
    }
}

fn selector_param() -> ParamSpec {
    ParamSpec::required(
        "selector",
        ParamType::String,
        ParamKind::Selector,
        "CSS selector of the target element",
    )
}

fn interaction_timeout_param() -> ParamSpec {
    ParamSpec::optional(
        "timeout_ms",
        ParamType::Integer,
        ParamKind::TimeoutMs,
        None,
        "How long to wait for the element, in milliseconds (defaults to the server click timeout)",
    )
}

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub id: ToolId,
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolDescriptor {
    pub fn for_tool(id: ToolId) -> Self {
        let (description, params) = match id {
            ToolId::NavigateToUrl => (
                "Navigate the browser to a URL and wait for the page to load",
                vec![ParamSpec::required(
                    "url",
                    ParamType::String,
                    ParamKind::Url,
                    "Absolute http(s) URL to open",
                )],
            ),
            ToolId::GetPageContent => (
                "Get the current page's text, links and images",
                vec![ParamSpec::optional(
                    "format",
                    ParamType::String,
                    ParamKind::Format,
                    Some(json!("text")),
                    "Body format: text, html or markdown",
                )],
            ),
            ToolId::GetPageTitle => ("Get the current page's title", vec![]),
            ToolId::ClickElement => (
                "Click the first element matching a selector",
                vec![selector_param(), interaction_timeout_param()],
            ),
            ToolId::FillInput => (
                "Type text into an input field",
                vec![
                    selector_param(),
                    ParamSpec::required("text", ParamType::String, ParamKind::Text, "Text to enter"),
                    interaction_timeout_param(),
                ],
            ),
            ToolId::WaitForElement => (
                "Wait until an element matching a selector appears",
                vec![
                    selector_param(),
                    ParamSpec::optional(
                        "timeout",
                        ParamType::Number,
                        ParamKind::TimeoutSecs,
                        Some(json!(30)),
                        "Timeout in seconds, default 30",
                    ),
                ],
            ),
            ToolId::ExecuteJavascript => (
                "Execute JavaScript in the page and return its result",
                vec![ParamSpec::required(
                    "script",
                    ParamType::String,
                    ParamKind::Script,
                    "JavaScript expression or IIFE to evaluate",
                )],
            ),
            ToolId::TakeScreenshot => (
                "Take a PNG screenshot of the current page",
                vec![
                    ParamSpec::optional(
                        "path",
                        ParamType::String,
                        ParamKind::Path,
                        Some(json!("screenshot.png")),
                        "File to write, default screenshot.png",
                    ),
                    ParamSpec::optional(
                        "full_page",
                        ParamType::Boolean,
                        ParamKind::Flag,
                        Some(json!(true)),
                        "Capture the whole scrollable page",
                    ),
                ],
            ),
            ToolId::GetElementText => (
                "Get the text content of an element",
                vec![selector_param(), interaction_timeout_param()],
            ),
            ToolId::GetElementAttribute => (
                "Get an attribute value of an element",
                vec![
                    selector_param(),
                    ParamSpec::required(
                        "attribute",
                        ParamType::String,
                        ParamKind::AttributeName,
                        "Attribute name to read",
                    ),
                    interaction_timeout_param(),
                ],
            ),
        };

        Self {
            id,
            name: id.name(),
            description,
            params,
        }
    }

    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            properties.insert(param.name.to_string(), param.schema());
        }
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// MCP `tools/list` entry.
    pub fn to_wire(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }
}

pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    index: HashMap<&'static str, usize>,
}

impl ToolCatalog {
    pub fn new(extended: bool) -> Result<Self> {
        let tools: Vec<ToolDescriptor> = ToolId::ALL
            .iter()
            .filter(|id| extended || !id.is_extended())
            .map(|id| ToolDescriptor::for_tool(*id))
            .collect();
        Self::from_descriptors(tools)
    }

    /// Check names are unique and each descriptor agrees with its handler id.
    pub fn from_descriptors(tools: Vec<ToolDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            if tool.name != tool.id.name() {
                return Err(Error::Config(format!(
                    "tool '{}' is bound to handler '{}'",
                    tool.name,
                    tool.id.name()
                )));
            }
            if index.insert(tool.name, i).is_some() {
                return Err(Error::Config(format!("duplicate tool name '{}'", tool.name)));
            }
            let mut seen = Vec::new();
            for param in &tool.params {
                if seen.contains(&param.name) {
                    return Err(Error::Config(format!(
                        "tool '{}' declares parameter '{}' twice",
                        tool.name, param.name
                    )));
                }
                seen.push(param.name);
            }
        }
        Ok(Self { tools, index })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn list(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn to_wire(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.to_wire()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_order() {
        let catalog = ToolCatalog::new(false).unwrap();
        assert_eq!(
            catalog.names(),
            vec![
                "navigate_to_url",
                "get_page_content",
                "get_page_title",
                "click_element",
                "fill_input",
                "wait_for_element",
                "execute_javascript",
                "take_screenshot",
            ]
        );
        assert!(catalog.get("get_element_text").is_none());
    }

    #[test]
    fn test_extended_catalog() {
        let catalog = ToolCatalog::new(true).unwrap();
        assert_eq!(catalog.len(), 10);
        assert_eq!(catalog.names()[8], "get_element_text");
        assert_eq!(catalog.names()[9], "get_element_attribute");
    }

    #[test]
    fn test_required_arrays() {
        let catalog = ToolCatalog::new(true).unwrap();
        let required = |name: &str| catalog.get(name).unwrap().input_schema()["required"].clone();
        assert_eq!(required("navigate_to_url"), json!(["url"]));
        assert_eq!(required("get_page_title"), json!([]));
        assert_eq!(required("fill_input"), json!(["selector", "text"]));
        assert_eq!(required("wait_for_element"), json!(["selector"]));
        assert_eq!(required("take_screenshot"), json!([]));
        assert_eq!(required("get_element_attribute"), json!(["selector", "attribute"]));
    }

    #[test]
    fn test_wire_form() {
        let catalog = ToolCatalog::new(false).unwrap();
        let wire = catalog.get("take_screenshot").unwrap().to_wire();
        assert_eq!(wire["name"], "take_screenshot");
        assert_eq!(wire["inputSchema"]["type"], "object");
        assert_eq!(wire["inputSchema"]["properties"]["path"]["default"], "screenshot.png");
        assert_eq!(wire["inputSchema"]["properties"]["full_page"]["type"], "boolean");
        let wait = catalog.get("wait_for_element").unwrap().to_wire();
        assert_eq!(wait["inputSchema"]["properties"]["timeout"]["default"], 30);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let tools = vec![
            ToolDescriptor::for_tool(ToolId::GetPageTitle),
            ToolDescriptor::for_tool(ToolId::GetPageTitle),
        ];
        assert!(ToolCatalog::from_descriptors(tools).is_err());
    }

    #[test]
    fn test_rejects_mismatched_handler() {
        let mut desc = ToolDescriptor::for_tool(ToolId::ClickElement);
        desc.name = "press_button";
        assert!(ToolCatalog::from_descriptors(vec![desc]).is_err());
    }
}
