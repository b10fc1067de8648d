//! Trial pipeline orchestration.
//!
//! # Pipeline Flow
//!
//! 1. **Solution**: the configured producer materializes a candidate in the sandbox
//! 2. **Tests**: the task's batch command runs once and reports CTRF results
//! 3. **Reward**: the bundle's policy turns the outcome into a reward record
//! 4. **Persistence**: `reward.txt` and `reward.json` are written atomically
//! 5. **Feedback**: the record is optionally forwarded to an observability sink
//!
//! Steps 1 and 2 may fail, be cancelled, or panic; each case still reaches
//! step 4 with a zero reward. Only a persistence failure is returned as an
//! error.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use swe_verify::pipeline::TrialPipeline;
//! use swe_verify::runner::RunConfig;
//! use swe_verify::sandbox::LocalSandbox;
//! use swe_verify::task::TaskLoader;
//!
//! let bundle = Arc::new(TaskLoader::new("./tasks").load("web-scraper-task")?);
//! let sandbox = Arc::new(LocalSandbox::new("/tmp/trial")?);
//! let config = RunConfig::new("/tmp/trial/logs");
//!
//! let completion = TrialPipeline::new(bundle, sandbox, &config).run().await?;
//! println!("reward = {}", completion.record.reward);
//! ```

pub mod trial;

pub use trial::{persist_setup_failure, PipelineCompletion, TrialPipeline};
