/*!
 * Chapter translation pipeline.
 *
 * - `segmenter`: splits chapters into identified segments and splices them back
 * - `prompts`: marker wire format and response reconciliation
 * - `retry`: backoff policy shared by every retried call
 * - `concurrency`: fan-out limits and dispatch pacing
 * - `worker`: per-language state machine
 * - `orchestrator`: runs the workers of one content unit
 */

pub use self::orchestrator::{FanOutOrchestrator, FanOutReport, LanguageResult};
pub use self::segmenter::{DocumentSegmenter, Segment, SegmentedDocument};
pub use self::worker::{LanguageWorker, UnitWork, WorkerOutcome};

pub mod concurrency;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod segmenter;
pub mod worker;
