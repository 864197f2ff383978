use rusqlite::types::Value;

/// Accumulates `AND`-joined conditions with their bound values
#[derive(Debug, Default)]
pub struct WhereClause {
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: &str, value: impl Into<Value>) {
        self.conditions.push(condition.to_string());
        self.params.push(value.into());
    }

    /// Renders ` WHERE ...`, or an empty string when unconstrained
    pub fn sql(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_clause() {
        let mut clause = WhereClause::new();
        assert_eq!(clause.sql(), "");

        clause.push("site_id = ?", 4i64);
        clause.push("state = ?", "FAILED".to_string());
        assert_eq!(clause.sql(), " WHERE site_id = ? AND state = ?");
        assert_eq!(clause.params().len(), 2);
    }
}
