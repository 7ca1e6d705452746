use std::io::Write;

use crate::core::schema::ColumnInfo;
use crate::core::types::QueryStatus;
use crate::error::AppResult;

pub const ONE_GB_IN_BYTES: f64 = 1_073_741_824.0;

/// Receives query progress and decoded rows as pages are consumed.
pub trait PageObserver {
    fn on_query_start(&mut self, _query: &str) -> AppResult<()> {
        Ok(())
    }

    fn on_status(&mut self, _status: &QueryStatus) -> AppResult<()> {
        Ok(())
    }

    fn on_metadata(&mut self, _columns: &[ColumnInfo]) -> AppResult<()> {
        Ok(())
    }

    fn on_row(&mut self, rendered: &str) -> AppResult<()>;
}

/// Operator-facing text output.
pub struct ConsoleReporter<W: Write> {
    out: W,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PageObserver for ConsoleReporter<W> {
    fn on_query_start(&mut self, query: &str) -> AppResult<()> {
        writeln!(self.out, "Starting query: {query}")?;
        Ok(())
    }

    fn on_status(&mut self, status: &QueryStatus) -> AppResult<()> {
        writeln!(self.out, "Query progress so far: {}%", status.progress_percentage)?;
        writeln!(
            self.out,
            "Bytes Scanned so far: {} GB",
            status.cumulative_bytes_scanned as f64 / ONE_GB_IN_BYTES
        )?;
        writeln!(
            self.out,
            "Bytes Metered so far: {} GB",
            status.cumulative_bytes_metered as f64 / ONE_GB_IN_BYTES
        )?;
        Ok(())
    }

    fn on_metadata(&mut self, columns: &[ColumnInfo]) -> AppResult<()> {
        let summary = columns.iter().map(ToString::to_string).collect::<Vec<_>>();
        writeln!(self.out, "Metadata: [{}]", summary.join(", "))?;
        writeln!(self.out, "Data: ")?;
        Ok(())
    }

    fn on_row(&mut self, rendered: &str) -> AppResult<()> {
        writeln!(self.out, "{rendered}")?;
        self.out.flush()?;
        Ok(())
    }
}
