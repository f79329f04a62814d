use crate::customers::{normalize_name, CustomerRecord, CustomerTable, MERGE_MARKER};
use crate::error::Result;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Saved customer clean-up rules for a division, applied in order before
/// any customer analytics run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct CustomerMergeRules {
    #[schemars(description = "Ordered list of rules. Later rules see the result of earlier ones.")]
    #[serde(default)]
    pub rules: Vec<CustomerRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CustomerRule {
    /// Combine several spellings or legal entities into one customer.
    /// Values are summed period by period and the result carries the merge marker.
    Merge {
        #[schemars(description = "Customer names to merge FROM, matched case-insensitively.")]
        sources: Vec<String>,
        #[schemars(description = "Name of the merged customer, without the merge marker.")]
        target_name: String,
    },

    /// Rename a customer without merging.
    Rename { target: String, new_name: String },

    /// Drop a customer (e.g. intercompany sales) from analytics.
    Exclude { target: String },
}

impl CustomerMergeRules {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&schemars::schema_for!(CustomerMergeRules))
    }

    /// Applies the rules to a table, returning a new table. The input is left untouched.
    pub fn apply(&self, table: &CustomerTable) -> Result<CustomerTable> {
        let mut records = table.records().to_vec();

        for rule in &self.rules {
            apply_single_rule(&mut records, rule);
        }

        debug!(
            "Applied {} customer rules: {} records -> {}",
            self.rules.len(),
            table.records().len(),
            records.len()
        );

        CustomerTable::new(table.period_count(), records)
    }
}

fn apply_single_rule(records: &mut Vec<CustomerRecord>, rule: &CustomerRule) {
    match rule {
        CustomerRule::Rename { target, new_name } => {
            let key = normalize_name(target);
            for record in records.iter_mut() {
                if normalize_name(&record.name) == key {
                    record.name = new_name.clone();
                }
            }
        }

        CustomerRule::Exclude { target } => {
            let key = normalize_name(target);
            records.retain(|r| normalize_name(&r.name) != key);
        }

        CustomerRule::Merge {
            sources,
            target_name,
        } => merge_records(records, sources, target_name),
    }
}

fn merge_records(records: &mut Vec<CustomerRecord>, sources: &[String], target_name: &str) {
    let mut keys: Vec<String> = sources.iter().map(|s| normalize_name(s)).collect();
    keys.push(normalize_name(target_name));

    let first_match = records
        .iter()
        .position(|r| keys.contains(&normalize_name(&r.name)));
    let Some(insert_at) = first_match else {
        return;
    };

    let mut merged: Option<Vec<f64>> = None;
    records.retain(|r| {
        if !keys.contains(&normalize_name(&r.name)) {
            return true;
        }
        match merged.as_mut() {
            Some(sums) => {
                for (sum, value) in sums.iter_mut().zip(&r.raw_values) {
                    *sum += value;
                }
            }
            None => merged = Some(r.raw_values.clone()),
        }
        false
    });

    if let Some(raw_values) = merged {
        let name = format!("{}{}", target_name.trim(), MERGE_MARKER);
        records.insert(insert_at.min(records.len()), CustomerRecord::new(name, raw_values));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CustomerTable {
        CustomerTable::new(
            2,
            vec![
                CustomerRecord::new("Acme Ltd", vec![10.0, 20.0]),
                CustomerRecord::new("Beta", vec![1.0, 1.0]),
                CustomerRecord::new("ACME Trading", vec![5.0, 5.0]),
                CustomerRecord::new("Internal", vec![100.0, 100.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_merge_sums_and_marks() {
        let rules = CustomerMergeRules {
            rules: vec![CustomerRule::Merge {
                sources: vec!["acme ltd".to_string(), "Acme Trading".to_string()],
                target_name: "Acme Group".to_string(),
            }],
        };
        let merged = rules.apply(&table()).unwrap();

        assert_eq!(merged.records().len(), 3);
        let acme = &merged.records()[0];
        assert_eq!(acme.name, "Acme Group*");
        assert_eq!(acme.raw_values, vec![15.0, 25.0]);
        assert_eq!(normalize_name(&acme.name), "acme group");
    }

    #[test]
    fn test_rename_and_exclude() {
        let rules = CustomerMergeRules {
            rules: vec![
                CustomerRule::Exclude {
                    target: "internal".to_string(),
                },
                CustomerRule::Rename {
                    target: "BETA".to_string(),
                    new_name: "Beta GmbH".to_string(),
                },
            ],
        };
        let result = rules.apply(&table()).unwrap();
        assert_eq!(result.records().len(), 3);
        assert!(result.records().iter().any(|r| r.name == "Beta GmbH"));
        assert!(!result.records().iter().any(|r| r.name == "Internal"));
    }

    #[test]
    fn test_merge_without_matches_is_noop() {
        let rules = CustomerMergeRules {
            rules: vec![CustomerRule::Merge {
                sources: vec!["Nobody".to_string()],
                target_name: "Ghost".to_string(),
            }],
        };
        assert_eq!(rules.apply(&table()).unwrap(), table());
    }

    #[test]
    fn test_rules_json_round_trip() {
        let json = r#"{"rules": [
            {"action": "merge", "sources": ["A", "B"], "target_name": "AB"},
            {"action": "exclude", "target": "C"}
        ]}"#;
        let rules = CustomerMergeRules::from_json(json).unwrap();
        assert_eq!(rules.rules.len(), 2);
        assert_eq!(CustomerMergeRules::from_json(&rules.to_json().unwrap()).unwrap(), rules);
        assert!(CustomerMergeRules::schema_as_json().unwrap().contains("target_name"));
    }
}
