//! Per-run settings and the report sink
//!
//! Tools write their report lines (overlaps, layouts, mapping blocks) to the
//! sink held here; progress goes through `tracing`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Output sink, verbosity and thread count of one tool invocation
pub struct RunContext {
    out: Box<dyn Write + Send>,
    /// Report detail level; 0 is summaries only
    pub verbose: u8,
    /// Number of worker threads (0 = all available cores)
    pub threads: usize,
}

impl RunContext {
    /// Open the report sink; `-` is standard output
    pub fn new<P: AsRef<Path>>(output: P, verbose: u8, threads: usize) -> io::Result<Self> {
        let output = output.as_ref();
        let out: Box<dyn Write + Send> = if output == Path::new("-") {
            Box::new(BufWriter::new(io::stdout()))
        } else {
            Box::new(BufWriter::new(File::create(output)?))
        };
        Ok(Self { out, verbose, threads })
    }

    /// A context over an arbitrary writer
    pub fn with_writer(out: Box<dyn Write + Send>, verbose: u8, threads: usize) -> Self {
        Self { out, verbose, threads }
    }

    /// The report sink
    pub fn out(&mut self) -> &mut dyn Write {
        &mut *self.out
    }

    /// A rayon pool with `threads` workers
    pub fn thread_pool(&self) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
    }

    /// Run `op` on a fresh pool of `threads` workers
    pub fn install<R, F>(&self, op: F) -> Result<R, rayon::ThreadPoolBuildError>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        Ok(self.thread_pool()?.install(op))
    }

    /// Flush the report sink
    pub fn finish(mut self) -> io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_sink() -> io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("report.txt");
        let mut ctx = RunContext::new(&path, 1, 1)?;
        writeln!(ctx.out(), "line one")?;
        ctx.finish()?;
        assert_eq!(std::fs::read_to_string(&path)?, "line one\n");
        Ok(())
    }

    #[test]
    fn test_install_uses_pool_size() {
        let ctx = RunContext::with_writer(Box::new(io::sink()), 0, 3);
        let n = ctx.install(rayon::current_num_threads).unwrap();
        assert_eq!(n, 3);
        let sum: u64 = ctx.install(|| (1..=100u64).into_par_iter().sum()).unwrap();
        assert_eq!(sum, 5050);
    }

    #[test]
    fn test_missing_directory() {
        assert!(RunContext::new("/nonexistent/dir/report.txt", 0, 1).is_err());
    }
}
