//! Continuation tokens for server-driven paging.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::query::ast::{Expr, SkipTokenClause};
use crate::query::value::Value;
use crate::types::{MuxError, Result};

/// Ordered order-by values of the last item on a page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkipToken {
    /// `(property, value)` pairs in order-by order.
    pub components: Vec<(String, Value)>,
}

impl SkipToken {
    /// Creates a token from its components.
    pub fn new(components: Vec<(String, Value)>) -> Self {
        Self { components }
    }

    /// Returns the component for `property`.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.components
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, value)| value)
    }

    /// Encodes the token as URL-safe text.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(&self.components)
            .map_err(|err| MuxError::SkipToken(err.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decodes text produced by [`SkipToken::encode`].
    pub fn decode(text: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|err| MuxError::SkipToken(err.to_string()))?;
        let components: Vec<(String, Value)> =
            serde_json::from_slice(&bytes).map_err(|err| MuxError::SkipToken(err.to_string()))?;
        if components.is_empty() {
            return Err(MuxError::SkipToken("token carries no components".into()));
        }
        Ok(Self { components })
    }

    /// Lowers the token into the AST clause consumed by the normalizer.
    pub fn into_clause(self) -> SkipTokenClause {
        SkipTokenClause {
            components: self
                .components
                .into_iter()
                .map(|(name, value)| (name, Expr::Literal(value)))
                .collect(),
        }
    }
}
