//! Messages of `example.ExampleService`.

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "Actions", tag = "2")]
    pub action: i32,
    /// Free-form payload; `SayHello` expects a JSON object here.
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HelloReply {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ChatMessage {
    #[prost(string, tag = "1")]
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Actions {
    Create = 0,
    Read = 1,
    Update = 2,
    Delete = 3,
}

impl Actions {
    /// The name as written in the proto definition.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Actions::Create => "CREATE",
            Actions::Read => "READ",
            Actions::Update => "UPDATE",
            Actions::Delete => "DELETE",
        }
    }
}

impl HelloRequest {
    pub fn new(name: impl Into<String>, action: Actions, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action: action as i32,
            message: message.into(),
        }
    }

    /// A request carrying only a message, as sent on the streaming methods.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

impl ChatMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_accessor_falls_back_to_default() {
        let request = HelloRequest {
            action: 42,
            ..Default::default()
        };
        // prost maps unknown enum values to the default variant.
        assert_eq!(request.action(), Actions::Create);

        let request = HelloRequest::new("amizhthan", Actions::Delete, "");
        assert_eq!(request.action().as_str_name(), "DELETE");
    }
}
