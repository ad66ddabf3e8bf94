//! Request validation.
//!
//! [`parse_request`] turns an untyped [`RawRequest`] into one of three outcomes:
//!
//! | Input | Outcome |
//! |-------|---------|
//! | Implemented method, valid params | [`ParsedRequest::Wallet`] |
//! | Implemented method, invalid params | [`ProviderError::InvalidParams`] naming the first bad field |
//! | Wallet-namespace method we do not implement | [`ProviderError::UnsupportedMethod`] |
//! | Anything else | [`ParsedRequest::Passthrough`] for the chain RPC |
//!
//! ```rust
//! use batua::schema::{parse_request, ParsedRequest};
//! use batua::types::{RawRequest, TypedRequest};
//!
//! let parsed = parse_request(&RawRequest::without_params("eth_chainId")).unwrap();
//! assert_eq!(parsed, ParsedRequest::Wallet(TypedRequest::ChainId));
//!
//! let parsed = parse_request(&RawRequest::without_params("eth_blockNumber")).unwrap();
//! assert!(matches!(parsed, ParsedRequest::Passthrough(_)));
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_path_to_error::Segment;

use crate::error::ProviderError;
use crate::types::{Method, RawRequest, TypedRequest};

/// Signing methods that must never reach a public RPC node.
const RESERVED_METHODS: &[&str] = &[
    "eth_sign",
    "eth_signTransaction",
    "eth_signTypedData",
    "eth_signTypedData_v3",
    "eth_signTypedData_v4",
    "personal_sign",
];

/// Namespaces owned by the wallet.
const RESERVED_PREFIXES: &[&str] = &["wallet_", "experimental_", "batua_"];

/// Outcome of validating a request.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedRequest {
    /// A method the provider answers itself.
    Wallet(TypedRequest),
    /// A method for the active chain's RPC node.
    Passthrough(RawRequest),
}

/// Whether `method` belongs to the wallet rather than the chain.
pub fn is_reserved(method: &str) -> bool {
    RESERVED_METHODS.contains(&method) || RESERVED_PREFIXES.iter().any(|p| method.starts_with(p))
}

/// Validate and decode a request.
pub fn parse_request(raw: &RawRequest) -> Result<ParsedRequest, ProviderError> {
    let Some(method) = Method::from_name(&raw.method) else {
        if is_reserved(&raw.method) {
            return Err(ProviderError::UnsupportedMethod(raw.method.clone()));
        }
        return Ok(ParsedRequest::Passthrough(raw.clone()));
    };

    let params = Params::new(method, raw.params.as_ref())?;
    let request = match method {
        Method::Accounts => params.none().map(|_| TypedRequest::Accounts)?,
        Method::ChainId => params.none().map(|_| TypedRequest::ChainId)?,
        Method::RequestAccounts => params.none().map(|_| TypedRequest::RequestAccounts)?,
        Method::SendTransaction => TypedRequest::SendTransaction(params.required()?),
        Method::SendCalls => TypedRequest::SendCalls(params.required()?),
        Method::GetCallsStatus => TypedRequest::GetCallsStatus(params.required()?),
        Method::GetCapabilities => TypedRequest::GetCapabilities(params.optional()?),
        Method::RevokePermissions => TypedRequest::RevokePermissions(params.first().cloned()),
    };
    Ok(ParsedRequest::Wallet(request))
}

/// Positional params of a recognized method.
struct Params<'a> {
    method: Method,
    items: &'a [Value],
}

impl<'a> Params<'a> {
    fn new(method: Method, params: Option<&'a Value>) -> Result<Self, ProviderError> {
        let items: &[Value] = match params {
            None | Some(Value::Null) => &[],
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(ProviderError::invalid_params(
                    method.as_str(),
                    "params",
                    Some(other.clone()),
                    "expected an array",
                ));
            }
        };
        Ok(Self { method, items })
    }

    fn first(&self) -> Option<&'a Value> {
        self.items.first()
    }

    fn none(&self) -> Result<(), ProviderError> {
        match self.items {
            [] => Ok(()),
            [first, ..] => Err(ProviderError::invalid_params(
                self.method.as_str(),
                "params.0",
                Some(first.clone()),
                "method takes no params",
            )),
        }
    }

    fn required<T: DeserializeOwned>(&self) -> Result<T, ProviderError> {
        let first = self.first().ok_or_else(|| {
            ProviderError::invalid_params(self.method.as_str(), "params.0", None, "missing param")
        })?;
        decode_at(self.method, first, "params.0")
    }

    fn optional<T: DeserializeOwned>(&self) -> Result<Option<T>, ProviderError> {
        match self.first() {
            None | Some(Value::Null) => Ok(None),
            Some(first) => decode_at(self.method, first, "params.0").map(Some),
        }
    }
}

/// Decode `value`, reporting the first failing field below `prefix`.
fn decode_at<T: DeserializeOwned>(
    method: Method,
    value: &Value,
    prefix: &str,
) -> Result<T, ProviderError> {
    serde_path_to_error::deserialize(value).map_err(|err| {
        let mut segments: Vec<String> = err
            .path()
            .iter()
            .filter_map(|segment| match segment {
                Segment::Seq { index } => Some(index.to_string()),
                Segment::Map { key } => Some(key.clone()),
                Segment::Enum { variant } => Some(variant.clone()),
                Segment::Unknown => None,
            })
            .collect();
        let message = err.inner().to_string();
        if let Some(field) = missing_field(&message) {
            segments.push(field.to_string());
        }
        let offending = lookup(value, &segments);
        let path = std::iter::once(prefix.to_string())
            .chain(segments)
            .collect::<Vec<_>>()
            .join(".");
        ProviderError::invalid_params(method.as_str(), path, offending, message)
    })
}

fn missing_field(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next()
}

fn lookup(value: &Value, segments: &[String]) -> Option<Value> {
    let mut current = value;
    for segment in segments {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current.clone())
}
