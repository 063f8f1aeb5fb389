//! Per-parameter model summary

use super::Module;
use serde::Serialize;
use std::fmt;

/// One named tensor in a summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterRow {
    pub name: String,
    pub shape: Vec<usize>,
    pub count: usize,
    pub trainable: bool,
}

/// Name, shape and size of every tensor a module owns
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelSummary {
    pub rows: Vec<ParameterRow>,
}

impl ModelSummary {
    /// Summarise `module`, naming its tensors under `scope`
    pub fn of(scope: &str, module: &dyn Module) -> Self {
        let rows = module
            .named_parameters()
            .into_iter()
            .map(|(name, t)| ParameterRow {
                name: format!("{scope}.{name}"),
                shape: t.shape().to_vec(),
                count: t.len(),
                trainable: t.requires_grad(),
            })
            .collect();
        Self { rows }
    }

    /// Concatenate summaries of several modules
    pub fn merge(parts: impl IntoIterator<Item = ModelSummary>) -> Self {
        Self { rows: parts.into_iter().flat_map(|s| s.rows).collect() }
    }

    pub fn trainable(&self) -> usize {
        self.rows.iter().filter(|r| r.trainable).map(|r| r.count).sum()
    }

    pub fn non_trainable(&self) -> usize {
        self.rows.iter().filter(|r| !r.trainable).map(|r| r.count).sum()
    }

    pub fn total(&self) -> usize {
        self.trainable() + self.non_trainable()
    }

    /// Rows at debug level, totals at info level
    pub fn log(&self) {
        for row in &self.rows {
            tracing::debug!(
                name = %row.name,
                shape = ?row.shape,
                count = row.count,
                trainable = row.trainable,
                "parameter"
            );
        }
        tracing::info!(
            tensors = self.rows.len(),
            trainable = self.trainable(),
            non_trainable = self.non_trainable(),
            "model summary"
        );
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.rows.iter().map(|r| r.name.len()).max().unwrap_or(4).max(4);
        writeln!(f, "{:<width$}  {:<24}  {:>10}", "name", "shape", "count")?;
        for row in &self.rows {
            let shape = format!("{:?}", row.shape);
            let marker = if row.trainable { "" } else { " (frozen)" };
            writeln!(f, "{:<width$}  {:<24}  {:>10}{marker}", row.name, shape, row.count)?;
        }
        writeln!(f, "Total params: {}", self.total())?;
        writeln!(f, "Trainable params: {}", self.trainable())?;
        write!(f, "Non-trainable params: {}", self.non_trainable())
    }
}
