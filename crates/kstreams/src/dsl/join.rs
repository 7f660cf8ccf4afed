//! Stream-stream join engine
//!
//! Both sides push their records into one engine. A record is buffered
//! until a record with the same join value arrives on the other side; the
//! earliest buffered partner wins. What happens to records still buffered
//! when a side completes depends on the join type.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tracing::{debug, trace};

use crate::message::{self, Message};
use crate::pipeline::StreamInput;

/// How unmatched records are treated once their side completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// Unmatched records are kept and never emitted
    Inner,
    /// Unmatched left records are emitted with `right: null`
    Left,
    /// Unmatched records of either side are emitted with a null counterpart
    Outer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

#[derive(Default)]
struct Buffers {
    left: VecDeque<(String, Message)>,
    right: VecDeque<(String, Message)>,
    left_done: bool,
    right_done: bool,
}

impl Buffers {
    fn pending(&mut self, side: Side) -> &mut VecDeque<(String, Message)> {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    fn mark_done(&mut self, side: Side) -> bool {
        let done = match side {
            Side::Left => &mut self.left_done,
            Side::Right => &mut self.right_done,
        };
        let first = !*done;
        *done = true;
        first
    }
}

pub(crate) struct JoinEngine {
    join_type: JoinType,
    key_field: String,
    output: StreamInput,
    buffers: Mutex<Buffers>,
}

impl JoinEngine {
    pub(crate) fn new<S: Into<String>>(join_type: JoinType, key_field: S, output: StreamInput) -> Self {
        Self {
            join_type,
            key_field: key_field.into(),
            output,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    fn join_value(&self, record: &Message) -> Option<String> {
        match message::field(record, &self.key_field)? {
            Value::String(s) if s.is_empty() => None,
            value => Some(message::key_string(value)),
        }
    }

    /// Accept a record from `side`, emitting a pair if a partner is pending
    pub(crate) fn push(&self, side: Side, record: &Message) {
        let Some(join_value) = self.join_value(record) else {
            trace!(key_field = %self.key_field, "record without join value ignored");
            return;
        };

        // Sent under the lock so pairs leave in match order across both sides
        let mut buffers = self.buffers.lock();
        let other = buffers.pending(side.other());
        match other.iter().position(|(value, _)| *value == join_value) {
            Some(index) => {
                if let Some((_, partner)) = other.remove(index) {
                    let joined = match side {
                        Side::Left => pair(record.clone(), partner),
                        Side::Right => pair(partner, record.clone()),
                    };
                    self.output.send(joined);
                }
            }
            None => buffers.pending(side).push_back((join_value, record.clone())),
        }
    }

    /// Record that `side` completed; flush per join type, complete the
    /// output once both sides are done
    pub(crate) fn complete(&self, side: Side) {
        let mut buffers = self.buffers.lock();
        if !buffers.mark_done(side) {
            return;
        }

        let flushed: Vec<Message> = match (self.join_type, side) {
            (JoinType::Outer, _) | (JoinType::Left, Side::Left) => {
                buffers.pending(side).drain(..).map(|(_, record)| record).collect()
            }
            _ => Vec::new(),
        };
        debug!(
            join_type = ?self.join_type,
            side = ?side,
            flushed = flushed.len(),
            "join side completed"
        );

        for record in flushed {
            let joined = match side {
                Side::Left => pair(record, Value::Null),
                Side::Right => pair(Value::Null, record),
            };
            self.output.send(joined);
        }

        if buffers.left_done && buffers.right_done {
            self.output.complete();
        }
    }
}

impl Side {
    fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

fn pair(left: Message, right: Message) -> Message {
    json!({ "left": left, "right": right })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Inbound;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<Inbound>) -> Vec<Inbound> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_inner_join_matches_fifo_per_key() {
        let (input, mut rx) = StreamInput::channel();
        let engine = JoinEngine::new(JoinType::Inner, "key", input);

        engine.push(Side::Left, &json!({"key": "a", "value": 1}));
        engine.push(Side::Left, &json!({"key": "a", "value": 2}));
        engine.push(Side::Right, &json!({"key": "a", "value": "r"}));
        engine.push(Side::Right, &json!({"key": "b", "value": "unmatched"}));

        let out = drain(&mut rx);
        assert_eq!(
            out,
            vec![Inbound::Message(json!({
                "left": {"key": "a", "value": 1},
                "right": {"key": "a", "value": "r"}
            }))]
        );

        engine.complete(Side::Left);
        engine.complete(Side::Right);
        assert_eq!(drain(&mut rx), vec![Inbound::Completed]);
    }

    #[test]
    fn test_records_without_join_value_are_ignored() {
        let (input, mut rx) = StreamInput::channel();
        let engine = JoinEngine::new(JoinType::Outer, "key", input);

        engine.push(Side::Left, &json!({"value": 1}));
        engine.push(Side::Left, &json!({"key": "", "value": 2}));
        engine.push(Side::Right, &json!({"key": null, "value": 3}));
        engine.complete(Side::Left);
        engine.complete(Side::Right);

        assert_eq!(drain(&mut rx), vec![Inbound::Completed]);
    }

    #[test]
    fn test_left_join_flushes_only_left() {
        let (input, mut rx) = StreamInput::channel();
        let engine = JoinEngine::new(JoinType::Left, "key", input);

        engine.push(Side::Left, &json!({"key": "l"}));
        engine.push(Side::Right, &json!({"key": "r"}));
        engine.complete(Side::Right);
        assert!(drain(&mut rx).is_empty());

        engine.complete(Side::Left);
        assert_eq!(
            drain(&mut rx),
            vec![
                Inbound::Message(json!({"left": {"key": "l"}, "right": null})),
                Inbound::Completed,
            ]
        );
    }

    #[test]
    fn test_outer_join_flushes_both_sides() {
        let (input, mut rx) = StreamInput::channel();
        let engine = JoinEngine::new(JoinType::Outer, "key", input);

        engine.push(Side::Left, &json!({"key": "l"}));
        engine.push(Side::Right, &json!({"key": "r"}));
        engine.complete(Side::Right);
        engine.complete(Side::Right);
        engine.complete(Side::Left);

        assert_eq!(
            drain(&mut rx),
            vec![
                Inbound::Message(json!({"left": null, "right": {"key": "r"}})),
                Inbound::Message(json!({"left": {"key": "l"}, "right": null})),
                Inbound::Completed,
            ]
        );
    }
}
