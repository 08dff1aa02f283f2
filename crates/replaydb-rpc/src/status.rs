//! Translation of domain errors to transport statuses.

use replaydb_commons::ReplayError;
use tonic::Status;

/// Maps a domain error onto the matching transport status kind.
pub fn to_status(err: ReplayError) -> Status {
    match err {
        ReplayError::InvalidArgument(msg) => Status::invalid_argument(msg),
        ReplayError::NotFound(msg) => Status::not_found(msg),
        ReplayError::FailedPrecondition(msg) => Status::failed_precondition(msg),
        ReplayError::Internal(msg) => Status::internal(msg),
        ReplayError::DeadlineExceeded(msg) => Status::deadline_exceeded(msg),
        ReplayError::Cancelled(msg) => Status::cancelled(msg),
        ReplayError::ResourceExhausted(msg) => Status::resource_exhausted(msg),
    }
}

/// The canonical status for a table name that does not resolve.
pub fn table_not_found(name: &str) -> Status {
    Status::not_found(format!("Priority table {} was not found", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_error_kinds_map_to_codes() {
        assert_eq!(
            to_status(ReplayError::invalid_argument("x")).code(),
            Code::InvalidArgument
        );
        assert_eq!(to_status(ReplayError::not_found("x")).code(), Code::NotFound);
        assert_eq!(
            to_status(ReplayError::failed_precondition("x")).code(),
            Code::FailedPrecondition
        );
        assert_eq!(to_status(ReplayError::internal("x")).code(), Code::Internal);
        assert_eq!(
            to_status(ReplayError::deadline_exceeded("x")).code(),
            Code::DeadlineExceeded
        );
    }

    #[test]
    fn test_table_not_found_message() {
        let status = table_not_found("experience");
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "Priority table experience was not found");
    }
}
