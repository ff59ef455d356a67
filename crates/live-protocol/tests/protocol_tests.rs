//! Protocol layer tests: action codes, envelope decoding, payload aliases
//! and error replies.

#[cfg(test)]
mod tests {
    use live_protocol::payloads::*;
    use live_protocol::*;
    use serde_json::json;

    // ─────────────────────────────────────────────────────────────────────
    // Wire enums
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn action_codes_match_existing_clients() {
        assert_eq!(Action::None.code(), 0);
        assert_eq!(Action::Join.code(), 1);
        assert_eq!(Action::CodeChange.code(), 2);
        assert_eq!(Action::SyncData.code(), 3);
        assert_eq!(Action::Leave.code(), 4);
        assert_eq!(Action::GetData.code(), 5);
        assert_eq!(Action::LockCode.code(), 6);
        assert_eq!(Action::UnlockCode.code(), 7);
        assert_eq!(Action::TeacherJoin.code(), 8);
        assert_eq!(Action::ClassroomDeleted.code(), 9);
        assert_eq!(Action::AssignmentCreate.code(), 10);
        assert_eq!(Action::SubmitAssignment.code(), 11);
        assert_eq!(Action::GradeAssignment.code(), 12);
        assert_eq!(Action::Error.code(), 13);
    }

    #[test]
    fn action_serializes_as_integer() {
        assert_eq!(serde_json::to_value(Action::CodeChange).unwrap(), json!(2));
        let parsed: Action = serde_json::from_value(json!(8)).unwrap();
        assert_eq!(parsed, Action::TeacherJoin);
    }

    #[test]
    fn error_action_decodes_from_its_code() {
        assert_eq!(Action::try_from(13).unwrap(), Action::Error);
        assert_eq!(
            Action::try_from(99).unwrap_err(),
            "unknown Action code 99"
        );
    }

    #[test]
    fn unknown_action_code_is_rejected() {
        assert!(serde_json::from_value::<Action>(json!(42)).is_err());
        assert!(Action::try_from(14).is_err());
    }

    #[test]
    fn whiteboard_kind_codes() {
        assert_eq!(WhiteboardKind::try_from(0).unwrap(), WhiteboardKind::Public);
        assert_eq!(WhiteboardKind::try_from(1).unwrap(), WhiteboardKind::Private);
        assert_eq!(WhiteboardKind::try_from(2).unwrap(), WhiteboardKind::Assignment);
        assert_eq!(WhiteboardKind::Assignment.to_string(), "ASSIGNMENT");
    }

    #[test]
    fn role_and_connection_state_codes() {
        assert_eq!(serde_json::to_value(Role::Teacher).unwrap(), json!(1));
        assert_eq!(serde_json::to_value(ConnectionState::Connected).unwrap(), json!(1));
        assert_eq!(serde_json::to_value(ConnectionState::Disconnected).unwrap(), json!(0));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Envelope
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn envelope_from_wire_format() {
        let wire = r#"{"action":2,"user_id":"alice","data":{"whiteboard_type":0,"code":"print(1)"}}"#;
        let envelope = Envelope::parse(wire).unwrap();
        assert_eq!(envelope.action, Action::CodeChange);
        assert_eq!(envelope.user_id.as_deref(), Some("alice"));

        let request: CodeChangeRequest = envelope.payload().unwrap();
        assert_eq!(request.whiteboard_type, WhiteboardKind::Public);
        assert_eq!(request.code, "print(1)");
        assert!(request.target_user.is_none());
    }

    #[test]
    fn envelope_user_id_and_data_are_optional() {
        let envelope = Envelope::parse(r#"{"action":1}"#).unwrap();
        assert_eq!(envelope.action, Action::Join);
        assert!(envelope.user_id.is_none());
        assert!(envelope.data.is_none());
    }

    #[test]
    fn garbage_is_malformed() {
        let err = Envelope::parse("not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);

        let err = Envelope::parse(r#"{"action":99}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);
    }

    #[test]
    fn missing_payload_is_malformed() {
        let envelope = Envelope::new(Action::GetData, None);
        let err = envelope.payload::<GetDataRequest>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEnvelope);
        assert!(err.to_string().contains("GET_DATA"));
    }

    #[test]
    fn outbound_envelope_always_carries_user_id_field() {
        let envelope = Envelope::event(Action::LockCode, &EditableEvent { editable: false });
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["action"], 6);
        assert!(value["user_id"].is_null());
        assert_eq!(value["data"]["editable"], false);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Payload aliases
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn assignment_create_accepts_legacy_field_names() {
        let legacy: AssignmentCreateRequest = serde_json::from_value(json!({
            "assignment_name": "Loops",
            "assignment_description": "iterate",
            "assignment_code": "for i in range(10): pass",
        }))
        .unwrap();
        let modern: AssignmentCreateRequest = serde_json::from_value(json!({
            "title": "Loops",
            "description": "iterate",
            "starterCode": "for i in range(10): pass",
        }))
        .unwrap();
        assert_eq!(legacy, modern);
    }

    #[test]
    fn assignment_create_defaults_optional_fields() {
        let request: AssignmentCreateRequest =
            serde_json::from_value(json!({ "title": "Recursion" })).unwrap();
        assert_eq!(request.assignment_description, "");
        assert_eq!(request.assignment_code, "");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Errors
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn error_envelope_shape() {
        let err = LiveError::role_violation("shared whiteboard is locked");
        let envelope = Envelope::error(&err, Some(Action::CodeChange));
        assert_eq!(envelope.action, Action::Error);

        let payload: ErrorPayload = envelope.payload().unwrap();
        assert_eq!(payload.code, 4400);
        assert_eq!(payload.kind, "ROLE_VIOLATION");
        assert_eq!(payload.message, "shared whiteboard is locked");
        assert_eq!(payload.action, Some(Action::CodeChange));
        assert_eq!(payload.error_kind(), Some(ErrorKind::RoleViolation));
    }

    #[test]
    fn error_codes_roundtrip() {
        let kinds = [
            ErrorKind::UnknownClassroom,
            ErrorKind::NotEnrolled,
            ErrorKind::DirectoryUnavailable,
            ErrorKind::SessionClosed,
            ErrorKind::UnknownParticipant,
            ErrorKind::RoleViolation,
            ErrorKind::DuplicateTeacher,
            ErrorKind::MalformedEnvelope,
            ErrorKind::UnknownWhiteboard,
            ErrorKind::DuplicateAssignment,
            ErrorKind::UnsupportedAction,
        ];
        for kind in kinds {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(1), None);
    }

    #[test]
    fn error_messages() {
        let err = LiveError::NotEnrolled {
            classroom_id: 7,
            user_id: "bob".into(),
        };
        assert_eq!(err.to_string(), "user bob is not enrolled in classroom 7");
        assert_eq!(
            LiveError::UnsupportedAction(Action::GradeAssignment).to_string(),
            "action GRADE_ASSIGNMENT is not supported"
        );
    }
}
