//! Variables, arguments and directives

use crate::core::error::PlanError;
use crate::schema::{FieldDescriptor, TypeRef};
use graphql_parser::query::{Directive, Value as GqlValue, VariableDefinition};
use serde_json::{Map, Number, Value};

/// Convert a document value to JSON, substituting variables
///
/// A variable that was not supplied becomes null.
pub fn value_to_json(value: &GqlValue<'_, String>, variables: &Map<String, Value>) -> Value {
    match value {
        GqlValue::Null => Value::Null,
        GqlValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
        GqlValue::Int(i) => i.as_i64().map_or(Value::Null, Value::from),
        GqlValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        GqlValue::String(s) => Value::String(s.clone()),
        GqlValue::Boolean(b) => Value::Bool(*b),
        GqlValue::Enum(e) => Value::String(e.clone()),
        GqlValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| value_to_json(item, variables))
                .collect(),
        ),
        GqlValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), value_to_json(value, variables)))
                .collect(),
        ),
    }
}

/// Apply variable definitions to the supplied variables
///
/// Defaults fill in missing variables; a non-null variable that is missing
/// without a default, or explicitly null, fails with `MissingVariable`. Supplied
/// variables the operation does not declare are dropped.
pub fn coerce_variables(
    definitions: &[VariableDefinition<'_, String>],
    supplied: &Map<String, Value>,
) -> Result<Map<String, Value>, PlanError> {
    let mut coerced = Map::new();
    for definition in definitions {
        let ty = TypeRef::from_ast(&definition.var_type);
        match supplied.get(&definition.name) {
            // An explicit null never falls back to the default
            Some(Value::Null) if ty.is_non_null() => {
                return Err(PlanError::MissingVariable {
                    name: definition.name.clone(),
                    ty: ty.to_string(),
                });
            }
            Some(value) => {
                coerced.insert(definition.name.clone(), value.clone());
            }
            None => match &definition.default_value {
                Some(default) => {
                    coerced.insert(definition.name.clone(), value_to_json(default, &Map::new()));
                }
                None if ty.is_non_null() => {
                    return Err(PlanError::MissingVariable {
                        name: definition.name.clone(),
                        ty: ty.to_string(),
                    });
                }
                // Left absent: reads as null, and arguments bound to it
                // keep their defaults
                None => {}
            },
        }
    }
    Ok(coerced)
}

/// Resolve the arguments of one field selection
///
/// Returns the arguments in declaration order with defaults applied.
pub fn resolve_arguments(
    type_name: &str,
    field: &FieldDescriptor,
    supplied: &[(String, GqlValue<'_, String>)],
    variables: &Map<String, Value>,
) -> Result<Map<String, Value>, PlanError> {
    let mut provided = Map::new();
    for (name, value) in supplied {
        if !field.arguments.contains_key(name) {
            return Err(PlanError::UnknownArgument {
                type_name: type_name.to_string(),
                field: field.name.clone(),
                argument: name.clone(),
            });
        }
        // An argument bound to an absent variable counts as not provided
        if let GqlValue::Variable(variable) = value
            && !variables.contains_key(variable)
        {
            continue;
        }
        provided.insert(name.clone(), value_to_json(value, variables));
    }

    let mut resolved = Map::new();
    for argument in field.arguments.values() {
        let value = provided
            .remove(&argument.name)
            .or_else(|| argument.default_value.clone());
        match value {
            Some(Value::Null) | None if argument.ty.is_non_null() => {
                return Err(PlanError::MissingArgument {
                    type_name: type_name.to_string(),
                    field: field.name.clone(),
                    argument: argument.name.clone(),
                });
            }
            Some(value) => {
                resolved.insert(argument.name.clone(), value);
            }
            None => {}
        }
    }
    Ok(resolved)
}

/// Evaluate `@skip` and `@include`; `false` means the selection is dropped
pub fn evaluate_directives(
    directives: &[Directive<'_, String>],
    variables: &Map<String, Value>,
) -> Result<bool, PlanError> {
    for directive in directives {
        let skip_when = match directive.name.as_str() {
            "skip" => true,
            "include" => false,
            _ => continue,
        };
        let condition = directive
            .arguments
            .iter()
            .find(|(name, _)| name == "if")
            .map(|(_, value)| value_to_json(value, variables));
        match condition {
            Some(Value::Bool(flag)) if flag == skip_when => return Ok(false),
            Some(Value::Bool(_)) => {}
            _ => {
                return Err(PlanError::InvalidDirective {
                    name: directive.name.clone(),
                });
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ArgumentDescriptor;
    use graphql_parser::query::{Definition, OperationDefinition, Selection, parse_query};
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_coerce_variables_applies_defaults() {
        let doc = parse_query::<String>(
            "query($id: ID!, $first: Int = 10, $after: String) { a }",
        )
        .unwrap();
        let Definition::Operation(OperationDefinition::Query(query)) = &doc.definitions[0] else {
            panic!("expected a query");
        };

        let coerced = coerce_variables(&query.variable_definitions, &vars(json!({"id": "1"}))).unwrap();
        assert_eq!(Value::Object(coerced), json!({"id": "1", "first": 10}));

        let err = coerce_variables(&query.variable_definitions, &Map::new()).unwrap_err();
        assert_eq!(
            err,
            PlanError::MissingVariable {
                name: "id".into(),
                ty: "ID!".into()
            }
        );

        let err = coerce_variables(&query.variable_definitions, &vars(json!({"id": null})));
        assert!(matches!(err, Err(PlanError::MissingVariable { .. })));
    }

    #[test]
    fn test_resolve_arguments() {
        let field = FieldDescriptor::new("books", "[String]")
            .argument(ArgumentDescriptor::new("genre", "String!"))
            .argument(ArgumentDescriptor::new("first", "Int").default_value(json!(5)));

        let doc = parse_query::<String>("{ books(first: $n, genre: \"scifi\") }").unwrap();
        let Definition::Operation(OperationDefinition::SelectionSet(set)) = &doc.definitions[0] else {
            panic!("expected a selection set");
        };
        let Selection::Field(selection) = &set.items[0] else {
            panic!("expected a field");
        };

        // $n absent: the default applies
        let args = resolve_arguments("Query", &field, &selection.arguments, &Map::new()).unwrap();
        assert_eq!(Value::Object(args), json!({"genre": "scifi", "first": 5}));

        let args = resolve_arguments("Query", &field, &selection.arguments, &vars(json!({"n": 2}))).unwrap();
        assert_eq!(args["first"], json!(2));

        let err = resolve_arguments("Query", &field, &[], &Map::new()).unwrap_err();
        assert!(matches!(err, PlanError::MissingArgument { argument, .. } if argument == "genre"));

        let doc = parse_query::<String>("{ books(limit: 1) }").unwrap();
        let Definition::Operation(OperationDefinition::SelectionSet(set)) = &doc.definitions[0] else {
            panic!("expected a selection set");
        };
        let Selection::Field(selection) = &set.items[0] else {
            panic!("expected a field");
        };
        let err = resolve_arguments("Query", &field, &selection.arguments, &Map::new()).unwrap_err();
        assert!(matches!(err, PlanError::UnknownArgument { .. }));
    }

    #[test]
    fn test_evaluate_directives() {
        let doc = parse_query::<String>(
            "{ a @skip(if: true) b @include(if: $show) c @skip(if: false) @include(if: true) d @skip }",
        )
        .unwrap();
        let Definition::Operation(OperationDefinition::SelectionSet(set)) = &doc.definitions[0] else {
            panic!("expected a selection set");
        };
        let directives: Vec<_> = set
            .items
            .iter()
            .map(|item| match item {
                Selection::Field(field) => field.directives.clone(),
                _ => panic!("expected a field"),
            })
            .collect();

        let show = vars(json!({"show": false}));
        assert!(!evaluate_directives(&directives[0], &show).unwrap());
        assert!(!evaluate_directives(&directives[1], &show).unwrap());
        assert!(evaluate_directives(&directives[2], &show).unwrap());
        assert!(matches!(
            evaluate_directives(&directives[3], &show),
            Err(PlanError::InvalidDirective { name }) if name == "skip"
        ));
    }
}
