use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn prefixed(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

macro_rules! object_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(prefixed($prefix))
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(v: &str) -> Self {
                Self(v.to_string())
            }
        }
    };
}

object_id!(RunId, "run");
object_id!(StepId, "step");
object_id!(ToolCallId, "call");
object_id!(MessageId, "msg");
object_id!(ThreadId, "thread");
object_id!(AssistantId, "asst");
object_id!(PrincipalId, "user");
object_id!(FileId, "file");
