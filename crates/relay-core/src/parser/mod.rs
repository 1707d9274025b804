//! Block-reference extraction engine.
//!
//! Given an [`RpcInput`] and a [`BlockParser`] descriptor from the chain spec,
//! [`parse`] locates the value that names a block inside the request params or
//! the response result. Every terminal value is returned stringified; callers
//! that need a height hand the string to [`RpcInput::parse_block`].
//!
//! All functions here are pure. A failed extraction is a [`ParseError`] local
//! to that call.

mod block;
mod input;
mod value;

pub use block::{
    parse_default_block_parameter, EARLIEST_BLOCK, FINALIZED_BLOCK, LATEST_BLOCK,
    NOT_APPLICABLE, PENDING_BLOCK, SAFE_BLOCK,
};
pub use input::{DataSource, JsonRpcInput, RpcInput};
pub use value::Value;

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::ParseError;
use crate::spec::{BlockParser, ParserFunc};

// ==============================================================================
// Dispatch
// ==============================================================================

/// Extract the block reference described by `block_parser` from `input`.
///
/// A `ValueNotSet` outcome is replaced by the parser's default value when one
/// is configured; every other error propagates unchanged.
pub fn parse(
    input: &dyn RpcInput,
    block_parser: &BlockParser,
    source: DataSource,
) -> Result<Vec<Value>, ParseError> {
    let args = &block_parser.parser_arg;
    let outcome = match block_parser.parser_func {
        ParserFunc::Empty => return Ok(Vec::new()),
        ParserFunc::ParseByArg => parse_by_arg(input, args, source),
        ParserFunc::ParseCanonical => parse_canonical(input, args, source),
        ParserFunc::ParseDictionary => parse_dictionary(input, args, source),
        ParserFunc::ParseDictionaryOrOrdered => parse_dictionary_or_ordered(input, args, source),
        ParserFunc::Default => parse_default(args),
        ParserFunc::Unspecified => {
            return Err(ParseError::Unsupported(format!(
                "block parser function {}",
                block_parser.parser_func
            )))
        }
    };

    match outcome {
        Err(ParseError::ValueNotSet) if !block_parser.default_value.is_empty() => {
            Ok(vec![Value::String(block_parser.default_value.clone())])
        }
        other => other,
    }
}

/// Select the payload half a strategy operates on.
///
/// Results are always wrapped in a one-element array: the decoded object when
/// the bytes are a JSON object, otherwise the untouched raw bytes.
pub fn data_to_parse(input: &dyn RpcInput, source: DataSource) -> Result<Cow<'_, Value>, ParseError> {
    match source {
        DataSource::Params => Ok(Cow::Borrowed(input.params())),
        DataSource::Result => {
            let raw = input.result();
            if raw.is_empty() {
                return Err(ParseError::EmptyResult);
            }
            let element = match serde_json::from_slice::<serde_json::Map<String, serde_json::Value>>(raw)
            {
                Ok(object) => Value::from(serde_json::Value::Object(object)),
                Err(_) => Value::Raw(raw.to_vec()),
            };
            Ok(Cow::Owned(Value::Array(vec![element])))
        }
    }
}

// ==============================================================================
// Strategies
// ==============================================================================

fn parse_default(args: &[String]) -> Result<Vec<Value>, ParseError> {
    let first = args
        .first()
        .ok_or_else(|| ParseError::InvalidArgument("DEFAULT requires one argument".into()))?;
    Ok(vec![Value::String(first.clone())])
}

/// The block is a positional parameter: `args = [index]`.
fn parse_by_arg(
    input: &dyn RpcInput,
    args: &[String],
    source: DataSource,
) -> Result<Vec<Value>, ParseError> {
    let [arg] = args else {
        return Err(ParseError::InvalidArgument(format!(
            "PARSE_BY_ARG expects exactly 1 argument, got {}",
            args.len()
        )));
    };
    let index = parse_index(arg)?;

    let data = data_to_parse(input, source)?;
    match data.as_ref() {
        Value::Array(items) => {
            let item = items.get(index).ok_or(ParseError::ValueNotSet)?;
            Ok(vec![Value::String(item.stringify())])
        }
        other => Err(ParseError::StructuralMismatch(format!(
            "PARSE_BY_ARG supports array payloads only, got {}",
            other.kind()
        ))),
    }
}

/// The block sits at a fixed path: `args = [index, key, key, ...]`.
///
/// Array payloads: only the outer index miss is `ValueNotSet`, a missing key
/// further down is a hard error. Object payloads: the whole argument list is
/// the key path and any missing key is `ValueNotSet`.
fn parse_canonical(
    input: &dyn RpcInput,
    args: &[String],
    source: DataSource,
) -> Result<Vec<Value>, ParseError> {
    let Some((first, keys)) = args.split_first() else {
        return Err(ParseError::InvalidArgument(
            "PARSE_CANONICAL requires at least 1 argument".into(),
        ));
    };

    let data = data_to_parse(input, source)?;
    match data.as_ref() {
        Value::Array(items) => {
            let index = parse_index(first)?;
            let mut container = items.get(index).ok_or(ParseError::ValueNotSet)?;
            for key in keys {
                let Value::Object(map) = container else {
                    return Err(ParseError::StructuralMismatch(format!(
                        "expected an object to read field {key:?}, got {}",
                        container.kind()
                    )));
                };
                container = map.get(key).ok_or_else(|| {
                    ParseError::StructuralMismatch(format!("object has no field {key:?}"))
                })?;
            }
            Ok(vec![Value::String(container.stringify())])
        }
        Value::Object(map) => {
            let mut current: &BTreeMap<String, Value> = map;
            let (last, path) = args.split_last().ok_or(ParseError::ValueNotSet)?;
            for key in path {
                match current.get(key) {
                    Some(Value::Object(inner)) => current = inner,
                    Some(other) => {
                        return Err(ParseError::StructuralMismatch(format!(
                            "expected an object at field {key:?}, got {}",
                            other.kind()
                        )))
                    }
                    None => return Err(ParseError::ValueNotSet),
                }
            }
            let terminal = current.get(last).ok_or(ParseError::ValueNotSet)?;
            Ok(vec![Value::String(terminal.stringify())])
        }
        other => Err(ParseError::StructuralMismatch(format!(
            "PARSE_CANONICAL supports array and object payloads, got {}",
            other.kind()
        ))),
    }
}

/// The block is a named property: `args = [prop_name, separator]`.
fn parse_dictionary(
    input: &dyn RpcInput,
    args: &[String],
    source: DataSource,
) -> Result<Vec<Value>, ParseError> {
    let [prop_name, separator] = args else {
        return Err(ParseError::InvalidArgument(format!(
            "PARSE_DICTIONARY expects 2 arguments, got {}",
            args.len()
        )));
    };

    let data = data_to_parse(input, source)?;
    match data.as_ref() {
        Value::Array(items) => find_separated_property(items, prop_name, separator)
            .map(|value| vec![Value::String(value)])
            .ok_or(ParseError::ValueNotSet),
        Value::Object(map) => map
            .get(prop_name)
            .map(|value| vec![Value::String(value.stringify())])
            .ok_or(ParseError::ValueNotSet),
        other => Err(ParseError::StructuralMismatch(format!(
            "PARSE_DICTIONARY supports array and object payloads, got {}",
            other.kind()
        ))),
    }
}

/// Named property with a positional fallback: `args = [prop_name, separator, index]`.
fn parse_dictionary_or_ordered(
    input: &dyn RpcInput,
    args: &[String],
    source: DataSource,
) -> Result<Vec<Value>, ParseError> {
    let [prop_name, separator, fallback] = args else {
        return Err(ParseError::InvalidArgument(format!(
            "PARSE_DICTIONARY_OR_ORDERED expects 3 arguments, got {}: {}",
            args.len(),
            args.join(",")
        )));
    };
    let index = parse_index(fallback)?;

    let data = data_to_parse(input, source)?;
    match data.as_ref() {
        Value::Array(items) => {
            if let Some(value) = find_separated_property(items, prop_name, separator) {
                return Ok(vec![Value::String(value)]);
            }
            let item = items.get(index).ok_or(ParseError::ValueNotSet)?;
            Ok(vec![Value::String(item.stringify())])
        }
        Value::Object(map) => map
            .get(prop_name)
            .or_else(|| map.get(fallback))
            .map(|value| vec![Value::String(value.stringify())])
            .ok_or(ParseError::ValueNotSet),
        other => Err(ParseError::StructuralMismatch(format!(
            "PARSE_DICTIONARY_OR_ORDERED supports array and object payloads, got {}",
            other.kind()
        ))),
    }
}

/// Scan string elements shaped `name<sep>value` for `prop_name`.
fn find_separated_property(items: &[Value], prop_name: &str, separator: &str) -> Option<String> {
    items.iter().find_map(|item| {
        let (name, value) = item.as_str()?.split_once(separator)?;
        (name == prop_name).then(|| value.to_owned())
    })
}

/// Plain base-10 digits only; `str::parse` would also take a leading `+`.
fn parse_index(arg: &str) -> Result<usize, ParseError> {
    let invalid = |reason: &dyn std::fmt::Display| {
        ParseError::InvalidArgument(format!("{arg:?} is not an unsigned index: {reason}"))
    };
    if arg.starts_with('+') {
        return Err(invalid(&"sign not allowed"));
    }
    arg.parse::<u32>()
        .map(|i| i as usize)
        .map_err(|e| invalid(&e))
}

// ==============================================================================
// Block Helpers
// ==============================================================================

/// Requested block of a request. `NOT_APPLICABLE` when the API has no block.
pub fn parse_block_from_params(
    input: &dyn RpcInput,
    block_parser: &BlockParser,
) -> Result<i64, ParseError> {
    let result = parse(input, block_parser, DataSource::Params)?;
    let Some(first) = result.first() else {
        return Ok(NOT_APPLICABLE);
    };
    let block = first.as_str().ok_or_else(|| {
        ParseError::StructuralMismatch(format!("parsed block is a {}, not a string", first.kind()))
    })?;
    input.parse_block(block)
}

/// Block reported by a reply. Strips one layer of JSON string quoting, since
/// raw results such as `"0x10"` arrive with their quotes intact.
pub fn parse_block_from_reply(
    input: &dyn RpcInput,
    block_parser: &BlockParser,
) -> Result<i64, ParseError> {
    let result = parse(input, block_parser, DataSource::Result)?;
    let Some(first) = result.first() else {
        return Ok(NOT_APPLICABLE);
    };
    let block = first
        .as_str()
        .ok_or_else(|| ParseError::StructuralMismatch("block number is not string parseable".into()))?;
    let block = unquote_if_quoted(block)?;
    input.parse_block(&block)
}

/// Values extracted from a reply, e.g. a block hash.
pub fn parse_message_response(
    input: &dyn RpcInput,
    result_parser: &BlockParser,
) -> Result<Vec<Value>, ParseError> {
    parse(input, result_parser, DataSource::Result)
}

pub(crate) fn unquote_if_quoted(text: &str) -> Result<Cow<'_, str>, ParseError> {
    if !text.contains('"') {
        return Ok(Cow::Borrowed(text));
    }
    serde_json::from_str::<String>(text)
        .map(Cow::Owned)
        .map_err(|e| ParseError::InvalidBlock(format!("could not unquote {text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> JsonRpcInput {
        JsonRpcInput::from(value)
    }

    fn strings(values: &[&str]) -> Vec<Value> {
        values.iter().map(|v| Value::from(*v)).collect()
    }

    // -- EMPTY / DEFAULT ------------------------------------------------------

    #[test]
    fn empty_returns_nothing_for_any_shape() {
        let parser = BlockParser::new(ParserFunc::Empty, &[]);
        for payload in [json!(null), json!([1, 2]), json!({"a": 1}), json!("x")] {
            assert_eq!(parse(&params(payload), &parser, DataSource::Params), Ok(vec![]));
        }
        let no_result = JsonRpcInput::from_result(Vec::new());
        assert_eq!(parse(&no_result, &parser, DataSource::Result), Ok(vec![]));
    }

    #[test]
    fn default_returns_first_argument_without_reading_input() {
        let parser = BlockParser::new(ParserFunc::Default, &["latest"]);
        let input = JsonRpcInput::from_result(Vec::new());
        assert_eq!(parse(&input, &parser, DataSource::Result), Ok(strings(&["latest"])));
    }

    #[test]
    fn unspecified_strategy_is_unsupported() {
        let parser = BlockParser::new(ParserFunc::Unspecified, &["0"]);
        assert!(matches!(
            parse(&params(json!([1])), &parser, DataSource::Params),
            Err(ParseError::Unsupported(_))
        ));
    }

    // -- BY_ARG ---------------------------------------------------------------

    #[test]
    fn by_arg_reads_positional_param() {
        let parser = BlockParser::new(ParserFunc::ParseByArg, &["1"]);
        let input = params(json!(["0xAA", "0x10"]));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["0x10"])));
    }

    #[test]
    fn by_arg_stringifies_numbers() {
        let parser = BlockParser::new(ParserFunc::ParseByArg, &["0"]);
        let input = params(json!([1234, false]));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["1234"])));
    }

    #[test]
    fn by_arg_out_of_range_is_value_not_set_unless_defaulted() {
        let input = params(json!(["0xAA", "0x10"]));
        let parser = BlockParser::new(ParserFunc::ParseByArg, &["5"]);
        assert_eq!(
            parse(&input, &parser, DataSource::Params),
            Err(ParseError::ValueNotSet)
        );

        let parser = parser.with_default("latest");
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["latest"])));
    }

    #[test]
    fn by_arg_rejects_bad_arguments_and_shapes() {
        let input = params(json!(["0xAA"]));
        for args in [&[][..], &["0", "1"][..], &["-1"][..], &["+1"][..], &["x"][..]] {
            let parser = BlockParser::new(ParserFunc::ParseByArg, args).with_default("latest");
            assert!(
                matches!(
                    parse(&input, &parser, DataSource::Params),
                    Err(ParseError::InvalidArgument(_))
                ),
                "args {args:?} must be rejected even with a default"
            );
        }

        let parser = BlockParser::new(ParserFunc::ParseByArg, &["0"]);
        assert!(matches!(
            parse(&params(json!({"block": 1})), &parser, DataSource::Params),
            Err(ParseError::StructuralMismatch(_))
        ));
    }

    #[test]
    fn by_arg_on_raw_result_returns_quoted_bytes() {
        let parser = BlockParser::new(ParserFunc::ParseByArg, &["0"]);
        let input = JsonRpcInput::from_result(br#""0x10""#.to_vec());
        assert_eq!(
            parse(&input, &parser, DataSource::Result),
            Ok(strings(&["\"0x10\""]))
        );
    }

    // -- CANONICAL ------------------------------------------------------------

    #[test]
    fn canonical_walks_keys_from_array_element() {
        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["0", "a", "b"]);

        let input = JsonRpcInput::from_result(br#"{"a":{"b":"0x7B"}}"#.to_vec());
        assert_eq!(parse(&input, &parser, DataSource::Result), Ok(strings(&["0x7B"])));

        let input = params(json!([{"a": {"b": "0x7B"}}]));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["0x7B"])));
    }

    #[test]
    fn canonical_array_path_missing_key_is_hard_error() {
        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["0", "a", "missing"])
            .with_default("latest");
        let input = params(json!([{"a": {"b": "0x7B"}}]));
        assert!(matches!(
            parse(&input, &parser, DataSource::Params),
            Err(ParseError::StructuralMismatch(_))
        ));

        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["0", "a", "b", "c"]);
        assert!(matches!(
            parse(&input, &parser, DataSource::Params),
            Err(ParseError::StructuralMismatch(_))
        ));
    }

    #[test]
    fn canonical_array_path_outer_index_miss_is_value_not_set() {
        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["3", "a"]);
        let input = params(json!([{"a": 1}]));
        assert_eq!(
            parse(&input, &parser, DataSource::Params),
            Err(ParseError::ValueNotSet)
        );
    }

    #[test]
    fn canonical_object_path_uses_all_args_as_keys() {
        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["header", "height"]);
        let input = params(json!({"header": {"height": 77}}));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["77"])));

        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["header", "missing"]);
        assert_eq!(
            parse(&input, &parser, DataSource::Params),
            Err(ParseError::ValueNotSet)
        );

        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["header", "height", "x"]);
        assert!(matches!(
            parse(&input, &parser, DataSource::Params),
            Err(ParseError::StructuralMismatch(_))
        ));
    }

    // -- DICTIONARY -----------------------------------------------------------

    #[test]
    fn dictionary_scans_separated_strings() {
        let parser = BlockParser::new(ParserFunc::ParseDictionary, &["height", ":"]);
        let input = params(json!(["height:42", "foo:bar"]));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["42"])));

        let input = params(json!(["foo:bar"]));
        assert_eq!(
            parse(&input, &parser, DataSource::Params),
            Err(ParseError::ValueNotSet)
        );
    }

    #[test]
    fn dictionary_splits_on_first_separator_only() {
        let parser = BlockParser::new(ParserFunc::ParseDictionary, &["height", "="]);
        let input = params(json!([7, "height=1=2"]));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["1=2"])));
    }

    #[test]
    fn dictionary_reads_object_key() {
        let parser = BlockParser::new(ParserFunc::ParseDictionary, &["height", ":"]);
        let input = params(json!({"height": 42}));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["42"])));
    }

    // -- DICTIONARY_OR_ORDERED -----------------------------------------------

    #[test]
    fn dictionary_or_ordered_falls_back_to_position() {
        let parser =
            BlockParser::new(ParserFunc::ParseDictionaryOrOrdered, &["height", ":", "2"]);
        let input = params(json!(["foo:bar", "baz:qux", "99"]));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["99"])));

        let input = params(json!(["foo:bar", "height:5", "99"]));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["5"])));

        let input = params(json!(["foo:bar"]));
        assert_eq!(
            parse(&input, &parser, DataSource::Params),
            Err(ParseError::ValueNotSet)
        );
    }

    #[test]
    fn dictionary_or_ordered_object_falls_back_to_literal_index_key() {
        let parser =
            BlockParser::new(ParserFunc::ParseDictionaryOrOrdered, &["height", ":", "1"]);
        let input = params(json!({"1": "0x20"}));
        assert_eq!(parse(&input, &parser, DataSource::Params), Ok(strings(&["0x20"])));
    }

    // -- Data source ----------------------------------------------------------

    #[test]
    fn non_json_result_is_passed_through_as_raw_bytes() {
        let raw = b"not json at all \xff".to_vec();
        let input = JsonRpcInput::from_result(raw.clone());
        let data = data_to_parse(&input, DataSource::Result).unwrap();
        assert_eq!(data.into_owned(), Value::Array(vec![Value::Raw(raw)]));
    }

    #[test]
    fn empty_result_is_an_error() {
        let input = JsonRpcInput::from_result(Vec::new());
        assert_eq!(
            data_to_parse(&input, DataSource::Result).map(|d| d.into_owned()),
            Err(ParseError::EmptyResult)
        );
    }

    // -- Block helpers --------------------------------------------------------

    #[test]
    fn block_from_params_decodes_height() {
        let parser = BlockParser::new(ParserFunc::ParseByArg, &["0"]);
        assert_eq!(parse_block_from_params(&params(json!(["0x10"])), &parser), Ok(16));

        let empty = BlockParser::new(ParserFunc::Empty, &[]);
        assert_eq!(
            parse_block_from_params(&params(json!(["0x10"])), &empty),
            Ok(NOT_APPLICABLE)
        );
    }

    #[test]
    fn block_from_reply_strips_json_quotes() {
        let parser = BlockParser::new(ParserFunc::ParseByArg, &["0"]);
        let input = JsonRpcInput::from_result(br#""0x1b4""#.to_vec());
        assert_eq!(parse_block_from_reply(&input, &parser), Ok(436));

        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["0", "number"]);
        let input = JsonRpcInput::from_result(br#"{"number":"0x10","hash":"0xab"}"#.to_vec());
        assert_eq!(parse_block_from_reply(&input, &parser), Ok(16));
    }

    #[test]
    fn message_response_extracts_hash() {
        let parser = BlockParser::new(ParserFunc::ParseCanonical, &["0", "hash"]);
        let input = JsonRpcInput::from_result(br#"{"number":"0x10","hash":"0xab"}"#.to_vec());
        assert_eq!(parse_message_response(&input, &parser), Ok(strings(&["0xab"])));
    }
}
