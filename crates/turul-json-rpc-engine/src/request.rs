use std::borrow::Cow;

use serde_json::{Number, Value};

use crate::error::RpcError;
use crate::extract::Document;
use crate::response::JsonRpcErrorResponse;
use crate::scanner::TokenKind;
use crate::types::RequestId;

/// Shape of the `params` member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamsShape {
    None,
    Positional(usize),
    Named(usize),
}

/// A JSON-RPC request read in place from a scanned document.
///
/// Only `method` and `id` are decoded eagerly; `params` stays a token index
/// until the method, and so its descriptors, are known.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    pub method: Cow<'a, str>,
    pub id: Option<RequestId>,
    /// Token index of the `params` array or object
    pub params: Option<usize>,
    doc: Document<'a>,
    root: usize,
}

impl<'a> Request<'a> {
    /// Read the request object rooted at token `root`.
    ///
    /// Failures come back as the error response to send, carrying the request
    /// id when it could be read.
    pub fn parse(doc: Document<'a>, root: usize) -> Result<Self, JsonRpcErrorResponse> {
        if doc.kind(root) != Some(TokenKind::Object) {
            return Err(JsonRpcErrorResponse::new(
                None,
                RpcError::invalid_request(Some(Value::String(
                    "request must be a JSON object".to_string(),
                ))),
            ));
        }

        let id = match doc.find_field(root, "id") {
            None => None,
            Some(token) => parse_id(&doc, token).ok_or_else(|| {
                JsonRpcErrorResponse::new(
                    None,
                    RpcError::invalid_request(Some(Value::String(
                        "id must be a string, a number or null".to_string(),
                    ))),
                )
            })?,
        };

        let method = match doc.find_field(root, "method") {
            Some(token) if doc.kind(token) == Some(TokenKind::String) => {
                doc.string(token).map_err(|e| {
                    JsonRpcErrorResponse::new(
                        id.clone(),
                        RpcError::parse_error(Some(Value::String(e.to_string()))),
                    )
                })?
            }
            Some(_) => {
                return Err(JsonRpcErrorResponse::new(
                    id,
                    RpcError::invalid_request(Some(Value::String(
                        "method must be a string".to_string(),
                    ))),
                ));
            }
            None => {
                return Err(JsonRpcErrorResponse::new(
                    id,
                    RpcError::invalid_request(Some(Value::String("missing method".to_string()))),
                ));
            }
        };

        let params = match doc.find_field(root, "params") {
            None => None,
            Some(token) => match doc.kind(token) {
                Some(TokenKind::Array | TokenKind::Object) => Some(token),
                Some(TokenKind::Primitive) if doc.raw(token) == "null" => None,
                _ => {
                    return Err(JsonRpcErrorResponse::new(
                        id,
                        RpcError::invalid_request(Some(Value::String(
                            "params must be an array or an object".to_string(),
                        ))),
                    ));
                }
            },
        };

        Ok(Self {
            method,
            id,
            params,
            doc,
            root,
        })
    }

    /// A request without an id expects no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn document(&self) -> Document<'a> {
        self.doc
    }

    /// Raw text of the whole request object
    pub fn raw(&self) -> &'a str {
        self.doc.raw(self.root)
    }

    /// Raw text of `params`, if any
    pub fn raw_params(&self) -> Option<&'a str> {
        self.params.map(|p| self.doc.raw(p))
    }

    pub fn params_shape(&self) -> ParamsShape {
        match self.params.and_then(|p| self.doc.token(p)) {
            Some(token) if token.kind == TokenKind::Array => ParamsShape::Positional(token.size),
            Some(token) => ParamsShape::Named(token.size),
            None => ParamsShape::None,
        }
    }
}

/// `Some(None)` for a null id, `None` for an id of the wrong kind
fn parse_id(doc: &Document<'_>, token: usize) -> Option<Option<RequestId>> {
    let raw = doc.raw(token);
    match doc.kind(token)? {
        TokenKind::String => doc.string(token).ok().map(|s| Some(RequestId::String(s.into_owned()))),
        TokenKind::Primitive if raw == "null" => Some(None),
        TokenKind::Primitive => serde_json::from_str::<Number>(raw)
            .ok()
            .map(|n| Some(RequestId::Number(n))),
        TokenKind::Object | TokenKind::Array => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{ScanMode, Token, scan};

    fn parse_with<R>(src: &str, f: impl FnOnce(Result<Request<'_>, JsonRpcErrorResponse>) -> R) -> R {
        let mut tokens = vec![Token::EMPTY; 64];
        let count = scan(src, &mut tokens, ScanMode::Strict).unwrap();
        let doc = Document::new(src, &tokens[..count]);
        f(Request::parse(doc, 0))
    }

    #[test]
    fn test_parse_request() {
        parse_with(r#"{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1}"#, |r| {
            let request = r.unwrap();
            assert_eq!(request.method, "add");
            assert_eq!(request.id, Some(RequestId::from(1)));
            assert_eq!(request.raw_params(), Some("[1,2]"));
            assert_eq!(request.params_shape(), ParamsShape::Positional(2));
            assert!(!request.is_notification());
        });
    }

    #[test]
    fn test_parse_notification() {
        parse_with(r#"{"method":"ping","params":{"a":1},"id":null}"#, |r| {
            let request = r.unwrap();
            assert!(request.is_notification());
            assert_eq!(request.params_shape(), ParamsShape::Named(1));
        });
        parse_with(r#"{"method":"ping"}"#, |r| {
            let request = r.unwrap();
            assert!(request.is_notification());
            assert_eq!(request.params_shape(), ParamsShape::None);
        });
    }

    #[test]
    fn test_string_and_float_ids() {
        parse_with(r#"{"method":"m","id":"abc"}"#, |r| {
            assert_eq!(r.unwrap().id, Some(RequestId::from("abc")));
        });
        parse_with(r#"{"method":"m","id":2.5}"#, |r| {
            let id = r.unwrap().id.unwrap();
            assert_eq!(serde_json::to_string(&id).unwrap(), "2.5");
        });
    }

    #[test]
    fn test_missing_method() {
        parse_with(r#"{"id":4}"#, |r| {
            let err = r.unwrap_err();
            assert_eq!(err.error.code, -32600);
            assert_eq!(err.id, Some(RequestId::from(4)));
        });
    }

    #[test]
    fn test_invalid_id_kind() {
        parse_with(r#"{"method":"m","id":{"x":1}}"#, |r| {
            let err = r.unwrap_err();
            assert_eq!(err.error.code, -32600);
            assert_eq!(err.id, None);
        });
        parse_with(r#"{"method":"m","id":true}"#, |r| {
            assert_eq!(r.unwrap_err().error.code, -32600);
        });
    }

    #[test]
    fn test_invalid_params_kind() {
        parse_with(r#"{"method":"m","params":"x","id":1}"#, |r| {
            assert_eq!(r.unwrap_err().error.code, -32600);
        });
        parse_with(r#"{"method":"m","params":null,"id":1}"#, |r| {
            assert_eq!(r.unwrap().params, None);
        });
    }

    #[test]
    fn test_undecodable_method() {
        parse_with(r#"{"method":"\ud800","id":1}"#, |r| {
            let err = r.unwrap_err();
            assert_eq!(err.error.code, -32700);
            assert_eq!(err.id, Some(RequestId::from(1)));
        });
    }

    #[test]
    fn test_non_object_request() {
        parse_with("[1]", |r| {
            assert_eq!(r.unwrap_err().error.code, -32600);
        });
    }
}
