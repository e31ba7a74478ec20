use std::collections::{HashMap, HashSet};

use graphql_parser::schema::{Definition, Document, Type, TypeDefinition};

/// Lookup tables derived from a schema document. The supergraph tables drive
/// representation extraction and rewrite type conditions; the API-schema
/// tables drive response shaping.
#[derive(Debug, Default)]
pub struct SchemaMetadata {
    pub possible_types: PossibleTypes,
    pub enum_values: HashMap<String, Vec<String>>,
    pub type_fields: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Default)]
pub struct PossibleTypes {
    map: HashMap<String, HashSet<String>>,
}

impl PossibleTypes {
    /// An exact name match always satisfies; an abstract condition is
    /// satisfied by any of its object/interface subtypes.
    pub fn entity_satisfies_type_condition(&self, type_name: &str, type_condition: &str) -> bool {
        if type_name == type_condition {
            true
        } else if let Some(possible_types_of_condition) = self.map.get(type_condition) {
            possible_types_of_condition.contains(type_name)
        } else {
            false
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaMetadataError {
    #[error("failed to parse schema document: {0}")]
    Parse(#[from] graphql_parser::schema::ParseError),
}

impl SchemaMetadata {
    pub fn from_sdl(sdl: &str) -> Result<Self, SchemaMetadataError> {
        let document = graphql_parser::parse_schema::<String>(sdl)?;
        Ok(Self::from_document(&document))
    }

    pub fn from_document(document: &Document<'_, String>) -> Self {
        let mut first_possible_types: HashMap<String, Vec<String>> = HashMap::new();
        let mut type_fields: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut enum_values: HashMap<String, Vec<String>> = HashMap::new();

        for definition in &document.definitions {
            match definition {
                Definition::TypeDefinition(TypeDefinition::Enum(enum_type)) => {
                    enum_values.insert(
                        enum_type.name.to_string(),
                        enum_type
                            .values
                            .iter()
                            .map(|value| value.name.to_string())
                            .collect(),
                    );
                }
                Definition::TypeDefinition(TypeDefinition::Object(object_type)) => {
                    let fields = type_fields.entry(object_type.name.to_string()).or_default();
                    for field in &object_type.fields {
                        fields.insert(field.name.to_string(), field.field_type.type_name());
                    }
                    for interface in &object_type.implements_interfaces {
                        first_possible_types
                            .entry(interface.to_string())
                            .or_default()
                            .push(object_type.name.to_string());
                    }
                }
                Definition::TypeDefinition(TypeDefinition::Interface(interface_type)) => {
                    let fields = type_fields
                        .entry(interface_type.name.to_string())
                        .or_default();
                    for field in &interface_type.fields {
                        fields.insert(field.name.to_string(), field.field_type.type_name());
                    }
                    for interface in &interface_type.implements_interfaces {
                        first_possible_types
                            .entry(interface.to_string())
                            .or_default()
                            .push(interface_type.name.to_string());
                    }
                }
                Definition::TypeDefinition(TypeDefinition::Union(union_type)) => {
                    first_possible_types.insert(
                        union_type.name.to_string(),
                        union_type
                            .types
                            .iter()
                            .map(|member| member.to_string())
                            .collect(),
                    );
                }
                _ => {}
            }
        }

        // Close the possible-types relation one level deep: members of a
        // union that are interfaces contribute their own implementors.
        let mut map: HashMap<String, HashSet<String>> = HashMap::new();
        for (abstract_name, direct_members) in &first_possible_types {
            let mut possible: HashSet<String> = HashSet::new();
            for member in direct_members {
                possible.insert(member.to_string());
                if let Some(transitive) = first_possible_types.get(member) {
                    for name in transitive {
                        possible.insert(name.to_string());
                    }
                }
            }
            map.insert(abstract_name.to_string(), possible);
        }

        SchemaMetadata {
            possible_types: PossibleTypes { map },
            enum_values,
            type_fields,
        }
    }
}

trait TypeName {
    fn type_name(&self) -> String;
}

impl TypeName for Type<'_, String> {
    fn type_name(&self) -> String {
        match self {
            Type::NamedType(named_type) => named_type.to_string(),
            Type::NonNullType(inner) => inner.type_name(),
            Type::ListType(inner) => inner.type_name(),
        }
    }
}
