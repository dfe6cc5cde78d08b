/*!
 * Job kickoff and detachment.
 *
 * Requests are validated synchronously, acknowledged with a job id, and the
 * translation work continues in background tasks that outlive the caller.
 */

pub use self::launcher::JobLauncher;
pub use self::models::{BookKickoffResult, KickoffAck, KickoffRequest, StatusEntry};

pub mod launcher;
pub mod models;
