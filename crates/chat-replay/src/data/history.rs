use serde::{Deserialize, Serialize};

/// One exchange: what the user said and what the producer replied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_message: String,
    pub assistant_reply: String,
}

impl ConversationTurn {
    pub fn new(user_message: impl Into<String>, assistant_reply: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_reply: assistant_reply.into(),
        }
    }
}

/// Ordered conversation turns, oldest first.
///
/// Callers can only append. Removing turns is reserved for
/// [`ChatSession`](crate::ChatSession) events (retry, undo, clear).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    turns: Vec<ConversationTurn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationTurn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn push_turn(&mut self, user_message: impl Into<String>, assistant_reply: impl Into<String>) {
        self.push(ConversationTurn::new(user_message, assistant_reply));
    }

    pub(crate) fn pop(&mut self) -> Option<ConversationTurn> {
        self.turns.pop()
    }

    pub(crate) fn clear(&mut self) {
        self.turns.clear();
    }
}

impl<U, A> FromIterator<(U, A)> for History
where
    U: Into<String>,
    A: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (U, A)>>(iter: I) -> Self {
        Self {
            turns: iter
                .into_iter()
                .map(|(user, reply)| ConversationTurn::new(user, reply))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a ConversationTurn;
    type IntoIter = std::slice::Iter<'a, ConversationTurn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}
