//! Server startup errors.

/// Failure to bring up or run the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The accept loop stopped with an error.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

impl ServerError {
    pub(crate) fn bind(addr: &str, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_owned(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::bind(
            "127.0.0.1:3001",
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        );
        assert_eq!(err.to_string(), "failed to bind 127.0.0.1:3001: in use");
    }

    #[test]
    fn serve_error_from_io() {
        let err: ServerError = std::io::Error::other("boom").into();
        assert!(matches!(err, ServerError::Serve(_)));
    }
}
