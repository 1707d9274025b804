//! Chain specification model.
//!
//! A [`ChainSpec`] describes one chain as the relay network sees it: block
//! timing, finalization distance, and per api-interface collections of APIs,
//! parse directives, and verifications. Specs are loaded from JSON or YAML
//! files and are immutable once delivered to a chain parser.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ==============================================================================
// Block Parser
// ==============================================================================

/// Extraction strategy for a block reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParserFunc {
    Empty,
    ParseByArg,
    ParseCanonical,
    ParseDictionary,
    ParseDictionaryOrOrdered,
    Default,
    /// Any name this build does not know.
    #[default]
    #[serde(other)]
    Unspecified,
}

impl std::fmt::Display for ParserFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "UNSPECIFIED"),
            Self::Empty => write!(f, "EMPTY"),
            Self::ParseByArg => write!(f, "PARSE_BY_ARG"),
            Self::ParseCanonical => write!(f, "PARSE_CANONICAL"),
            Self::ParseDictionary => write!(f, "PARSE_DICTIONARY"),
            Self::ParseDictionaryOrOrdered => write!(f, "PARSE_DICTIONARY_OR_ORDERED"),
            Self::Default => write!(f, "DEFAULT"),
        }
    }
}

/// Where and how to find a block reference inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockParser {
    #[serde(default)]
    pub parser_func: ParserFunc,
    #[serde(default)]
    pub parser_arg: Vec<String>,
    /// Substituted when the referenced value is absent. Empty means "no default".
    #[serde(default)]
    pub default_value: String,
}

impl BlockParser {
    pub fn new(parser_func: ParserFunc, args: &[&str]) -> Self {
        Self {
            parser_func,
            parser_arg: args.iter().map(|a| (*a).to_owned()).collect(),
            default_value: String::new(),
        }
    }

    pub fn with_default(mut self, default_value: &str) -> Self {
        self.default_value = default_value.to_owned();
        self
    }
}

// ==============================================================================
// APIs, Directives, Verifications
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Api {
    pub name: String,
    #[serde(default)]
    pub block_parsing: BlockParser,
    #[serde(default = "default_compute_units")]
    pub compute_units: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Addon that must be supported by a node URL for this API to be served.
    /// Empty for the base API set.
    #[serde(default)]
    pub addon: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionTag {
    GetBlocknum,
    GetBlockByNum,
}

/// A request template the provider itself sends to its nodes, together with
/// the block parser that reads the answer.
///
/// `function_template` is a JSON request body; the `{block}` placeholder is
/// replaced with the decimal block number and `{block_hex}` with `0x`-prefixed
/// hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseDirective {
    pub function_tag: FunctionTag,
    pub function_template: String,
    #[serde(default)]
    pub result_parsing: BlockParser,
}

impl ParseDirective {
    pub fn render(&self, block: Option<i64>) -> String {
        match block {
            Some(block) => self
                .function_template
                .replace("{block_hex}", &format!("{block:#x}"))
                .replace("{block}", &block.to_string()),
            None => self.function_template.clone(),
        }
    }
}

/// A check run against a node before an endpoint is allowed to serve.
///
/// `expected` of `"*"` accepts any non-empty value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub name: String,
    pub function_template: String,
    #[serde(default)]
    pub parse: BlockParser,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiCollection {
    pub api_interface: String,
    #[serde(default)]
    pub apis: Vec<Api>,
    #[serde(default)]
    pub parse_directives: Vec<ParseDirective>,
    #[serde(default)]
    pub verifications: Vec<Verification>,
}

impl ApiCollection {
    pub fn api(&self, name: &str) -> Option<&Api> {
        self.apis.iter().find(|api| api.name == name)
    }

    pub fn directive(&self, tag: FunctionTag) -> Option<&ParseDirective> {
        self.parse_directives.iter().find(|d| d.function_tag == tag)
    }
}

// ==============================================================================
// Chain Spec
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    /// Chain id, e.g. `ETH1`.
    pub index: String,
    pub average_block_time_ms: u64,
    #[serde(default)]
    pub block_distance_for_finalized_data: u32,
    #[serde(default)]
    pub blocks_in_finalization_proof: u32,
    #[serde(default)]
    pub allowed_block_lag_for_qos_sync: i64,
    #[serde(default)]
    pub data_reliability_enabled: bool,
    #[serde(default)]
    pub api_collections: Vec<ApiCollection>,
}

impl ChainSpec {
    pub fn collection(&self, api_interface: &str) -> Option<&ApiCollection> {
        self.api_collections
            .iter()
            .find(|c| c.api_interface == api_interface)
    }

    pub fn average_block_time(&self) -> Duration {
        Duration::from_millis(self.average_block_time_ms)
    }
}

fn default_compute_units() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_parser_func_deserializes_as_unspecified() {
        let parser: BlockParser =
            serde_json::from_str(r#"{"parser_func":"PARSE_SOMETHING_NEW","parser_arg":["0"]}"#)
                .unwrap();
        assert_eq!(parser.parser_func, ParserFunc::Unspecified);
        assert_eq!(parser.parser_arg, vec!["0".to_string()]);

        let parser: BlockParser =
            serde_json::from_str(r#"{"parser_func":"PARSE_DICTIONARY_OR_ORDERED"}"#).unwrap();
        assert_eq!(parser.parser_func, ParserFunc::ParseDictionaryOrOrdered);
        let parser: BlockParser = serde_json::from_str("{}").unwrap();
        assert_eq!(parser.parser_func, ParserFunc::Unspecified);
    }

    #[test]
    fn directive_render_substitutes_block_placeholders() {
        let directive = ParseDirective {
            function_tag: FunctionTag::GetBlockByNum,
            function_template:
                r#"{"method":"eth_getBlockByNumber","params":["{block_hex}",false],"n":{block}}"#
                    .into(),
            result_parsing: BlockParser::default(),
        };
        assert_eq!(
            directive.render(Some(255)),
            r#"{"method":"eth_getBlockByNumber","params":["0xff",false],"n":255}"#
        );
    }
}
