//! Asynchronous stream operators
//!
//! Stages that need to suspend (user `async_map` functions and the stateful
//! reducers) implement [`StreamOperator`]. The executor awaits one message
//! at a time, so an operator never sees message N+1 before message N has
//! left it.

use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::future::Future;
use std::marker::PhantomData;

use crate::error::{Result, StreamsError};
use crate::message::Message;

/// Trait for asynchronous pipeline operators
#[async_trait]
pub trait StreamOperator: Send + Sync + Debug {
    /// Transform one message
    ///
    /// # Returns
    /// The message handed to the next stage, or an error that terminates
    /// the pipeline
    async fn process(&self, message: Message) -> Result<Message>;

    /// Get the operator name
    fn name(&self) -> &str;
}

/// Operator wrapping a user supplied async function
pub struct AsyncMapOperator<F, Fut> {
    name: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncMapOperator<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Message>> + Send,
{
    pub fn new<S: Into<String>>(name: S, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncMapOperator<F, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMapOperator")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> StreamOperator for AsyncMapOperator<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Message>> + Send,
{
    async fn process(&self, message: Message) -> Result<Message> {
        (self.func)(message)
            .await
            .map_err(|e| StreamsError::operator(self.name.clone(), e))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_async_map_operator() {
        let op = AsyncMapOperator::new("double", |m: Message| async move {
            let n = m.as_i64().unwrap_or_default();
            tokio::task::yield_now().await;
            Ok(json!(n * 2))
        });

        assert_eq!(op.name(), "double");
        assert_eq!(op.process(json!(21)).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_async_map_operator_error() {
        let op = AsyncMapOperator::new("reject", |_m: Message| async move {
            Err::<Message, _>(anyhow::anyhow!("rejected"))
        });

        let err = op.process(json!(1)).await.unwrap_err();
        assert!(matches!(err, StreamsError::Operator { ref operator, .. } if operator == "reject"));
    }
}
