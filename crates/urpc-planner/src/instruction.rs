//! Instruction builder.
//!
//! Renders a schema set into the system instruction sent with every planning
//! request. Pure text construction.

use std::fmt::Write;

use urpc_core::{EntitySchema, SchemaSet};

/// Query operators offered to the model, with a literal example each.
pub const QUERY_OPERATORS: &[(&str, &str, &str)] = &[
    ("$eq", "equal", r#"{where: {status: {$eq: "active"}}}"#),
    ("$ne", "not equal", r#"{where: {status: {$ne: "deleted"}}}"#),
    ("$gt", "greater than", "{where: {age: {$gt: 18}}}"),
    ("$gte", "greater than or equal", "{where: {age: {$gte: 18}}}"),
    ("$lt", "less than", "{where: {price: {$lt: 100}}}"),
    ("$lte", "less than or equal", "{where: {price: {$lte: 100}}}"),
    ("$in", "value in list", r#"{where: {role: {$in: ["admin", "editor"]}}}"#),
    ("$nin", "value not in list", r#"{where: {role: {$nin: ["guest"]}}}"#),
    ("$like", "SQL-style pattern, % as wildcard", r#"{where: {name: {$like: "%john%"}}}"#),
    ("$nlike", "negated pattern", r#"{where: {name: {$nlike: "test%"}}}"#),
    ("$contains", "string or array contains", r#"{where: {tags: {$contains: "rust"}}}"#),
    ("$startsWith", "string prefix", r#"{where: {email: {$startsWith: "admin"}}}"#),
    ("$endsWith", "string suffix", r#"{where: {email: {$endsWith: "@example.com"}}}"#),
];

/// Operation vocabulary with a call-shape example each.
const OPERATION_EXAMPLES: &[(&str, &str)] = &[
    ("findMany", r#"repo({entity: "user", source: "memory"}).findMany({where: {age: {$gt: 18}}, limit: 10})"#),
    ("findOne", r#"repo({entity: "user", source: "memory"}).findOne({where: {id: "1"}})"#),
    ("create", r#"repo({entity: "user", source: "memory"}).create({data: {id: "generated-id", name: "John"}})"#),
    ("createMany", r#"repo({entity: "user", source: "memory"}).createMany({data: [{name: "A"}, {name: "B"}]})"#),
    ("update", r#"repo({entity: "user", source: "memory"}).update({where: {id: "1"}, data: {name: "Jane"}})"#),
    ("updateMany", r#"repo({entity: "user", source: "memory"}).updateMany({where: {active: false}, data: {archived: true}})"#),
    ("upsert", r#"repo({entity: "user", source: "memory"}).upsert({where: {email: "a@b.c"}, update: {name: "A"}, create: {email: "a@b.c", name: "A"}})"#),
    ("upsertMany", r#"repo({entity: "user", source: "memory"}).upsertMany({data: [{id: "1", name: "A"}], onConflict: "id"})"#),
    ("delete", r#"repo({entity: "user", source: "memory"}).delete({where: {id: "1"}})"#),
];

/// Renders instruction documents.
#[derive(Debug, Clone, Default)]
pub struct InstructionBuilder {
    preamble: Option<String>,
}

impl InstructionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the opening paragraph.
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// Render the full instruction for `schemas`.
    pub fn build(&self, schemas: &SchemaSet) -> String {
        let mut doc = String::new();

        doc.push_str(self.preamble.as_deref().unwrap_or(
            "You are a data operations assistant. Translate the user's request into an \
             ordered execution plan of repository calls. Only use the entities, fields \
             and sources listed below.",
        ));
        doc.push_str("\n\n");

        append_entities(&mut doc, schemas);
        append_operations(&mut doc);
        append_operators(&mut doc);
        append_response_format(&mut doc);
        append_examples(&mut doc);

        doc
    }
}

fn append_entities(doc: &mut String, schemas: &SchemaSet) {
    doc.push_str("## Entities\n\n");
    let names = schemas.entity_names();
    if names.is_empty() {
        doc.push_str("No entities are registered.\n\n");
        return;
    }

    for name in names {
        let _ = writeln!(doc, "### {}", name);
        match schemas.schemas.get(name) {
            Some(schema) => append_fields(doc, schema),
            None => doc.push_str("Fields: not declared\n"),
        }

        let default = schemas.default_source(name);
        let mut sources: Vec<&str> = Vec::new();
        for source in schemas.sources.get(name).into_iter().flatten() {
            if !sources.contains(&source.as_str()) {
                sources.push(source);
            }
        }
        if let Some(default) = default {
            if !sources.contains(&default) {
                sources.push(default);
            }
        }

        if sources.is_empty() {
            doc.push_str("Sources: none declared\n");
        } else {
            let rendered: Vec<String> = sources
                .iter()
                .map(|source| {
                    if Some(*source) == default {
                        format!("{} (default)", source)
                    } else {
                        source.to_string()
                    }
                })
                .collect();
            let _ = writeln!(doc, "Sources: {}", rendered.join(", "));
        }
        doc.push('\n');
    }
}

fn append_fields(doc: &mut String, schema: &EntitySchema) {
    if schema.fields.is_empty() {
        doc.push_str("Fields: none\n");
        return;
    }
    doc.push_str("Fields:\n");
    for (field, spec) in &schema.fields {
        let presence = if spec.optional { "optional" } else { "required" };
        let _ = write!(doc, "- {}: {} ({})", field, spec.field_type, presence);
        if let Some(description) = &spec.description {
            let _ = write!(doc, " - {}", description);
        }
        doc.push('\n');
    }
}

fn append_operations(doc: &mut String) {
    doc.push_str("## Operations\n\n");
    doc.push_str(
        "Every step is exactly one call of the form \
         `repo({entity: \"<entity>\", source: \"<source>\"}).<operation>(<options>)`.\n",
    );
    for (name, example) in OPERATION_EXAMPLES {
        let _ = writeln!(doc, "- {}: `{}`", name, example);
    }
    doc.push('\n');
}

fn append_operators(doc: &mut String) {
    doc.push_str("## Query operators\n\n");
    for (operator, meaning, example) in QUERY_OPERATORS {
        let _ = writeln!(doc, "- {} ({}): `{}`", operator, meaning, example);
    }
    doc.push_str("Options also accept `limit`, `offset` and `order_by`.\n\n");
}

fn append_response_format(doc: &mut String) {
    doc.push_str("## Response format\n\n");
    doc.push_str("Respond with a single JSON object and nothing else:\n");
    doc.push_str(
        r#"{"execution_plan": {"steps": [{"description": "...", "urpc_code": "...", "order": 1}], "total_steps": 1}, "summary": false}"#,
    );
    doc.push_str("\n\nRules:\n");
    doc.push_str("1) `order` starts at 1 and steps run in ascending order.\n");
    doc.push_str("2) Use the literal string \"generated-id\" wherever a new record needs a fresh id.\n");
    doc.push_str(
        "3) When a later step refers to the user created earlier in the plan, use the literal string \"user-id\".\n",
    );
    doc.push_str("4) Use the entity's default source unless the user names another one.\n");
    doc.push_str("5) Set \"summary\" to true when the user asks for an explanation of the results.\n\n");
}

fn append_examples(doc: &mut String) {
    doc.push_str("## Examples\n\n");
    doc.push_str("Request: Find all users\n");
    doc.push_str(
        r#"{"execution_plan": {"steps": [{"description": "Find all users", "urpc_code": "repo({entity: \"user\", source: \"memory\"}).findMany()", "order": 1}], "total_steps": 1}}"#,
    );
    doc.push_str("\n\nRequest: Create user John and create a post for him\n");
    doc.push_str(
        r#"{"execution_plan": {"steps": [{"description": "Create user John", "urpc_code": "repo({entity: \"user\", source: \"memory\"}).create({data: {id: \"generated-id\", name: \"John\"}})", "order": 1}, {"description": "Create a post for John", "urpc_code": "repo({entity: \"post\", source: \"memory\"}).create({data: {id: \"generated-id\", title: \"Hello\", userId: \"user-id\"}})", "order": 2}], "total_steps": 2}}"#,
    );
    doc.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use urpc_core::{EntityConfig, FieldSchema};

    fn schema_set() -> SchemaSet {
        let mut set = SchemaSet::new();
        set.schemas.insert(
            "user".into(),
            EntitySchema::new()
                .field("name", FieldSchema::required("string"))
                .field("email", FieldSchema::optional("string").with_description("contact address")),
        );
        set.sources
            .insert("user".into(), vec!["memory".into(), "indexeddb".into()]);
        set.configs.insert(
            "user".into(),
            EntityConfig {
                default_source: Some("indexeddb".into()),
            },
        );
        set
    }

    #[test]
    fn test_lists_fields_and_presence() {
        let doc = InstructionBuilder::new().build(&schema_set());
        assert!(doc.contains("### user"));
        assert!(doc.contains("- name: string (required)"));
        assert!(doc.contains("- email: string (optional) - contact address"));
    }

    #[test]
    fn test_marks_exactly_one_default_source() {
        let doc = InstructionBuilder::new().build(&schema_set());
        assert!(doc.contains("Sources: memory, indexeddb (default)"));
        assert_eq!(doc.matches("(default)").count(), 1);
    }

    #[test]
    fn test_default_source_marked_once_when_missing_or_repeated() {
        let mut set = SchemaSet::new();
        set.sources.insert("post".into(), vec!["api".into()]);
        set.sources
            .insert("user".into(), vec!["memory".into(), "memory".into()]);
        set.configs.insert(
            "post".into(),
            EntityConfig {
                default_source: Some("indexeddb".into()),
            },
        );
        set.configs.insert(
            "user".into(),
            EntityConfig {
                default_source: Some("memory".into()),
            },
        );

        let doc = InstructionBuilder::new().build(&set);
        let lines: Vec<&str> = doc.lines().filter(|l| l.starts_with("Sources:")).collect();
        assert_eq!(
            lines,
            vec!["Sources: api, indexeddb (default)", "Sources: memory (default)"]
        );
    }

    #[test]
    fn test_create_many_example_has_no_shared_placeholder() {
        let (_, example) = OPERATION_EXAMPLES
            .iter()
            .find(|(op, _)| *op == "createMany")
            .unwrap();
        assert!(!example.contains("generated-id"));
    }

    #[test]
    fn test_vocabulary_and_operators_present() {
        let doc = InstructionBuilder::new().build(&SchemaSet::new());
        for op in urpc_core::Operation::ALL {
            assert!(doc.contains(&format!("- {}: `repo(", op.as_str())), "missing {op}");
        }
        for (operator, _, _) in QUERY_OPERATORS {
            assert!(doc.contains(operator));
        }
        assert!(doc.contains("\"execution_plan\""));
    }

    #[test]
    fn test_empty_schema_is_still_valid() {
        let doc = InstructionBuilder::new().build(&SchemaSet::new());
        assert!(doc.contains("No entities are registered."));
        assert!(doc.contains("## Response format"));
    }

    #[test]
    fn test_custom_preamble() {
        let doc = InstructionBuilder::new()
            .with_preamble("Plan carefully.")
            .build(&SchemaSet::new());
        assert!(doc.starts_with("Plan carefully.\n\n"));
    }
}
