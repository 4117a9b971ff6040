pub mod draw_dxf;
pub mod parse_osm;

use std::path::Path;
use log::{info, error};

use crate::errors::Result;

/// One cached stage of the conversion pipeline. Each stage reads what the previous one left
/// in the working directory and leaves its own output there.
pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;

    fn is_cached(&self, dir: &Path) -> Result<bool>;
    fn clean(&self, dir: &Path) -> Result<()>;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    fn log_failure<T>(&self, step: &str, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            error!(
                etl_name = self.etl_name(),
                step = step,
                kind = format!("{:?}", err.kind).as_str(),
                err = err.message.as_str();
                "ETL step failed"
            );
        }
        result
    }

    fn process(&mut self, dir: &Path) -> Result<()> {
        info!(etl_name = self.etl_name(); "Starting ETL process");
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Using cached value");
            return Ok(());
        }

        info!(etl_name = self.etl_name(); "Extracting");
        let input = self.extract(dir);
        let input = self.log_failure("extract", input)?;

        info!(etl_name = self.etl_name(); "Transforming");
        let output = self.transform(input);
        let output = self.log_failure("transform", output)?;

        info!(etl_name = self.etl_name(); "Loading");
        let loaded = self.load(dir, output);
        self.log_failure("load", loaded)?;

        info!(etl_name = self.etl_name(); "Process finished");
        Ok(())
    }

    /// Drops any cached output first, so the stage always runs.
    fn reprocess(&mut self, dir: &Path) -> Result<()> {
        self.clean(dir)?;
        self.process(dir)
    }
}
