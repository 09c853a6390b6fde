//! Sub-query selections and their GraphQL rendering

use crate::plan::{OperationKind, PlanNode};
use crate::schema::TypeRef;
use serde_json::{Map, Value};
use std::fmt::Write;

/// An argument passed to a subgraph field, always sent as a variable
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedArgument {
    pub name: String,
    pub value: Value,
    pub ty: TypeRef,
}

/// One field of a sub-query
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedField {
    pub response_key: String,
    pub name: String,
    pub arguments: Vec<SelectedArgument>,
    /// Rendered as an inline fragment when set
    pub type_condition: Option<String>,
    pub selection: Selection,
    /// Fetched for the planner's own use (keys, `__typename`, required
    /// fields); never part of the response
    pub hidden: bool,
}

impl SelectedField {
    /// The subgraph counterpart of a plan node, without children
    pub fn from_node(node: &PlanNode) -> Self {
        let arguments = node
            .arguments
            .iter()
            .map(|(name, value)| SelectedArgument {
                name: name.clone(),
                value: value.clone(),
                ty: node
                    .field
                    .as_ref()
                    .and_then(|field| field.arguments.get(name))
                    .map_or_else(|| TypeRef::named("String"), |arg| arg.ty.clone()),
            })
            .collect();
        Self {
            response_key: node.response_key.clone(),
            name: node.field_name.clone(),
            arguments,
            type_condition: node.type_conditions.last().cloned(),
            selection: Selection::default(),
            hidden: false,
        }
    }

    pub fn hidden(name: &str, response_key: &str, type_condition: Option<String>) -> Self {
        Self {
            response_key: response_key.to_string(),
            name: name.to_string(),
            arguments: Vec::new(),
            type_condition,
            selection: Selection::default(),
            hidden: true,
        }
    }
}

/// A selection set sent to a subgraph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    fields: Vec<SelectedField>,
}

impl Selection {
    pub fn fields(&self) -> &[SelectedField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn push(&mut self, field: SelectedField) {
        self.fields.push(field);
    }

    /// Select `name` under `response_key` unless that key is already taken
    pub fn ensure_hidden(&mut self, name: &str, response_key: &str, type_condition: Option<String>) {
        if !self.fields.iter().any(|f| f.response_key == response_key) {
            self.fields
                .push(SelectedField::hidden(name, response_key, type_condition));
        }
    }

    /// Render the selection as `{ ... }`, collecting argument variables
    pub(crate) fn render(&self, out: &mut String, variables: &mut Vec<(String, SelectedArgument)>) {
        out.push_str("{ ");
        for field in &self.fields {
            if let Some(condition) = &field.type_condition {
                let _ = write!(out, "... on {} {{ ", condition);
                render_field(field, out, variables);
                out.push_str("} ");
            } else {
                render_field(field, out, variables);
            }
        }
        out.push('}');
    }

    /// Shape `source` like a subgraph would answer this selection
    ///
    /// Reads each field by name and writes it under its response key.
    /// Nested selections map over lists. Useful to back in-process
    /// subgraphs with plain JSON.
    pub fn project(&self, source: &Value) -> Value {
        let Value::Object(object) = source else {
            return Value::Null;
        };
        let typename = object.get("__typename").and_then(Value::as_str);
        let mut out = Map::new();
        for field in &self.fields {
            if let (Some(condition), Some(typename)) = (&field.type_condition, typename)
                && condition != typename
            {
                continue;
            }
            let value = object.get(&field.name).cloned().unwrap_or(Value::Null);
            let value = if field.selection.is_empty() {
                value
            } else {
                field.selection.project_value(&value)
            };
            out.insert(field.response_key.clone(), value);
        }
        Value::Object(out)
    }

    fn project_value(&self, value: &Value) -> Value {
        match value {
            Value::Array(items) => Value::Array(items.iter().map(|item| self.project_value(item)).collect()),
            Value::Object(_) => self.project(value),
            _ => Value::Null,
        }
    }
}

fn render_field(field: &SelectedField, out: &mut String, variables: &mut Vec<(String, SelectedArgument)>) {
    if field.response_key != field.name {
        let _ = write!(out, "{}: ", field.response_key);
    }
    out.push_str(&field.name);
    if !field.arguments.is_empty() {
        out.push('(');
        for (i, argument) in field.arguments.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let variable = format!("__arg{}", variables.len());
            let _ = write!(out, "{}: ${}", argument.name, variable);
            variables.push((variable, argument.clone()));
        }
        out.push(')');
    }
    out.push(' ');
    if !field.selection.is_empty() {
        field.selection.render(out, variables);
        out.push(' ');
    }
}

/// A rendered sub-query: GraphQL text plus its argument variables
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub query: String,
    pub variables: Map<String, Value>,
}

fn header(keyword: &str, extra: &[(String, String)], arguments: &[(String, SelectedArgument)]) -> String {
    let declarations: Vec<String> = extra
        .iter()
        .map(|(name, ty)| format!("${}: {}", name, ty))
        .chain(
            arguments
                .iter()
                .map(|(name, argument)| format!("${}: {}", name, argument.ty)),
        )
        .collect();
    if declarations.is_empty() {
        keyword.to_string()
    } else {
        format!("{}({})", keyword, declarations.join(", "))
    }
}

fn argument_values(arguments: Vec<(String, SelectedArgument)>) -> Map<String, Value> {
    arguments
        .into_iter()
        .map(|(name, argument)| (name, argument.value))
        .collect()
}

/// Render a root sub-query
pub fn render_root(operation: OperationKind, selection: &Selection) -> RenderedQuery {
    let mut body = String::new();
    let mut arguments = Vec::new();
    selection.render(&mut body, &mut arguments);
    RenderedQuery {
        query: format!("{} {}", header(operation.as_str(), &[], &arguments), body),
        variables: argument_values(arguments),
    }
}

/// Render an `_entities` sub-query; `$representations` is bound per batch
pub fn render_entities(type_name: &str, selection: &Selection) -> RenderedQuery {
    let mut body = String::new();
    let mut arguments = Vec::new();
    selection.render(&mut body, &mut arguments);
    let header = header(
        "query",
        &[("representations".to_string(), "[_Any!]!".to_string())],
        &arguments,
    );
    RenderedQuery {
        query: format!(
            "{} {{ _entities(representations: $representations) {{ ... on {} {} }} }}",
            header, type_name, body
        ),
        variables: argument_values(arguments),
    }
}
