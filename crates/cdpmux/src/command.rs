//! Typed command seam.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A CDP command with a statically known method and response shape.
///
/// The struct serializes to the command's `params` object.
pub trait Command: Serialize {
    const METHOD: &'static str;
    type Response: DeserializeOwned;
}

/// Response of commands that return `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
pub struct EmptyResponse {}
