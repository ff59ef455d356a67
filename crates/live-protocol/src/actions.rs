//! Numeric wire enums: envelope actions, whiteboard kinds, roles and
//! connection states.
//!
//! Every enum here travels as a bare integer so existing browser clients,
//! which switch on the numeric codes, keep working unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declares a `u8`-coded wire enum with `TryFrom<u8>`, `From<Self> for u8`
/// and a `Display` that prints the SCREAMING_SNAKE wire name.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal => $label:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "u8", into = "u8")]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $code, )+
        }

        impl $name {
            /// Numeric code sent over the wire.
            pub fn code(self) -> u8 {
                self as u8
            }

            /// SCREAMING_SNAKE name used in logs and error messages.
            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $label, )+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = String;

            fn try_from(code: u8) -> Result<Self, String> {
                match code {
                    $( $code => Ok(Self::$variant), )+
                    other => Err(format!("unknown {} code {other}", stringify!($name))),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value.code()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

wire_enum! {
    /// Envelope action identifiers.
    pub enum Action {
        None = 0 => "NONE",
        Join = 1 => "JOIN",
        CodeChange = 2 => "CODE_CHANGE",
        SyncData = 3 => "SYNC_DATA",
        Leave = 4 => "LEAVE",
        GetData = 5 => "GET_DATA",
        LockCode = 6 => "LOCK_CODE",
        UnlockCode = 7 => "UNLOCK_CODE",
        TeacherJoin = 8 => "TEACHER_JOIN",
        ClassroomDeleted = 9 => "CLASSROOM_DELETED",
        AssignmentCreate = 10 => "ASSIGNMENT_CREATE",
        /// Reserved; no behavior is defined yet.
        SubmitAssignment = 11 => "SUBMIT_ASSIGNMENT",
        /// Reserved; no behavior is defined yet.
        GradeAssignment = 12 => "GRADE_ASSIGNMENT",
        /// Server-only: error reply to the offending connection.
        Error = 13 => "ERROR",
    }
}

wire_enum! {
    /// The three families of code documents in a session.
    pub enum WhiteboardKind {
        Public = 0 => "PUBLIC",
        Private = 1 => "PRIVATE",
        Assignment = 2 => "ASSIGNMENT",
    }
}

wire_enum! {
    /// Role of a participant inside a classroom session.
    pub enum Role {
        Student = 0 => "STUDENT",
        Teacher = 1 => "TEACHER",
    }
}

wire_enum! {
    /// Whether a participant's connection is live.
    pub enum ConnectionState {
        Disconnected = 0 => "DISCONNECTED",
        Connected = 1 => "CONNECTED",
    }
}
