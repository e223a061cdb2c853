//! Per-message transforms.
//!
//! A transform maps one inbound message to zero or one outbound message, or
//! rejects it. Transforms are plain functions; any
//! `FnMut(Message) -> TransformResult` can be handed to the pipeline.

use crate::errors::TransformError;
use crate::message::Message;

/// Outcome of applying a transform to one message.
pub type TransformResult = Result<Option<Message>, TransformError>;

/// Parse the text as a base-10 integer, double it, and reply with the result as text.
///
/// Leading `+`/`-` signs are accepted; surrounding whitespace is not.
pub fn double_integer(message: Message) -> TransformResult {
    let text = message.to_text();
    let value: i64 = text
        .parse()
        .map_err(|source| TransformError::InvalidInteger {
            input: text.to_string(),
            source,
        })?;
    let doubled = value
        .checked_mul(2)
        .ok_or(TransformError::Overflow { value })?;
    Ok(Some(Message::Text(doubled.to_string())))
}

/// Uppercase the text of every message.
#[allow(clippy::unnecessary_wraps)]
pub fn uppercase(message: Message) -> TransformResult {
    Ok(Some(Message::Text(message.to_text().to_uppercase())))
}
