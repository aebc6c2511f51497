use serde_json::Value;

/// A named event as carried in one text frame
///
/// On the wire a frame is a JSON array whose first element is the event name
/// and whose remaining elements are the arguments: `["event", arg0, arg1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub name: String,
    pub args: Vec<Value>,
}

impl EventFrame {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        let mut items = Vec::with_capacity(self.args.len() + 1);
        items.push(Value::String(self.name.clone()));
        items.extend(self.args.iter().cloned());

        serde_json::to_string(&Value::Array(items))
            .map_err(|e| FrameError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FrameError::DeserializationError(e.to_string()))?;

        let Value::Array(items) = value else {
            return Err(FrameError::NotAnArray);
        };

        let mut items = items.into_iter();
        match items.next() {
            Some(Value::String(name)) if !name.is_empty() => Ok(Self {
                name,
                args: items.collect(),
            }),
            _ => Err(FrameError::MissingEventName),
        }
    }
}

/// Error types for event frame operations
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Frame is not a JSON array")]
    NotAnArray,

    #[error("Frame does not start with an event name")]
    MissingEventName,
}
