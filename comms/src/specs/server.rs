use serde::{Deserialize, Serialize};

/// The backend's answer to a training server request.
///
/// A `None` port is not an error, it means no server is assigned right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAssignment {
    pub status: String,
    pub session_id: Option<i64>,
    pub port: Option<u16>,
}

impl ServerAssignment {
    /// Builds the training server address on `host`, if a port was assigned.
    ///
    /// # Arguments
    /// * `host` - The host the training server runs on.
    ///
    /// # Returns
    /// An address of the form `dns:///{host}:{port}`.
    pub fn address(&self, host: &str) -> Option<String> {
        self.port.map(|port| format!("dns:///{host}:{port}"))
    }
}

/// Request body for the server assignment endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRequest {
    pub id: i64,
    pub start_fresh: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_only_when_port_assigned() {
        let mut assignment = ServerAssignment {
            status: "started".into(),
            session_id: Some(7),
            port: Some(8080),
        };
        assert_eq!(
            assignment.address("10.0.0.2").as_deref(),
            Some("dns:///10.0.0.2:8080")
        );

        assignment.port = None;
        assert_eq!(assignment.address("10.0.0.2"), None);
    }

    #[test]
    fn null_fields_deserialize() {
        let json = r#"{"status":"no server","session_id":null,"port":null}"#;
        let assignment: ServerAssignment = serde_json::from_str(json).unwrap();
        assert_eq!(assignment.port, None);
        assert_eq!(assignment.session_id, None);
    }
}
