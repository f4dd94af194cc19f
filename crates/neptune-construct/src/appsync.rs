//! API gateway: AppSync GraphQL API, Lambda data sources and resolvers.
//!
//! The schema file is parsed when the API is declared so that every resolver
//! can be checked against the fields the schema actually defines.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use graphql_parser::schema::{Definition, TypeDefinition, TypeExtension};

use crate::error::{ConstructError, Result};
use crate::iam::{PolicyStatement, Role};
use crate::lambda::Function;
use crate::prop::Prop;
use crate::stack::Stack;
use crate::token::{LogicalId, Token};

/// GraphQL root operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    Mutation,
    Subscription,
}

/// Object types and their fields, as declared by a schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphqlSchema {
    definition: String,
    query_type: String,
    mutation_type: String,
    subscription_type: String,
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl GraphqlSchema {
    pub fn parse(definition: &str) -> Result<Self> {
        let document = graphql_parser::parse_schema::<String>(definition)
            .map_err(|e| ConstructError::Schema(e.to_string()))?;

        let mut schema = Self {
            definition: definition.to_string(),
            query_type: "Query".to_string(),
            mutation_type: "Mutation".to_string(),
            subscription_type: "Subscription".to_string(),
            fields: BTreeMap::new(),
        };

        for def in document.definitions {
            match def {
                Definition::SchemaDefinition(roots) => {
                    if let Some(q) = roots.query {
                        schema.query_type = q;
                    }
                    if let Some(m) = roots.mutation {
                        schema.mutation_type = m;
                    }
                    if let Some(s) = roots.subscription {
                        schema.subscription_type = s;
                    }
                }
                Definition::TypeDefinition(TypeDefinition::Object(obj)) => {
                    schema
                        .fields
                        .entry(obj.name)
                        .or_default()
                        .extend(obj.fields.into_iter().map(|f| f.name));
                }
                Definition::TypeExtension(TypeExtension::Object(ext)) => {
                    schema
                        .fields
                        .entry(ext.name)
                        .or_default()
                        .extend(ext.fields.into_iter().map(|f| f.name));
                }
                _ => {}
            }
        }

        if !schema.fields.contains_key(&schema.query_type) {
            return Err(ConstructError::Schema(format!(
                "root query type '{}' is not defined",
                schema.query_type
            )));
        }

        tracing::debug!(types = schema.fields.len(), "Parsed GraphQL schema");
        Ok(schema)
    }

    /// Reads and parses a schema file.
    pub fn from_asset(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConstructError::Asset {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn has_field(&self, type_name: &str, field_name: &str) -> bool {
        self.fields
            .get(type_name)
            .is_some_and(|f| f.contains(field_name))
    }

    /// Which root operation a type serves, if any.
    pub fn operation_of(&self, type_name: &str) -> Option<Operation> {
        if type_name == self.query_type {
            Some(Operation::Query)
        } else if type_name == self.mutation_type {
            Some(Operation::Mutation)
        } else if type_name == self.subscription_type {
            Some(Operation::Subscription)
        } else {
            None
        }
    }
}

/// Clients authenticate with the API's static key.
const AUTHENTICATION_TYPE: &str = "API_KEY";

#[derive(Debug, Clone)]
pub struct GraphqlApiProps {
    pub name: String,
    pub schema: GraphqlSchema,
    pub xray_enabled: bool,
}

/// A declared GraphQL API.
#[derive(Debug, Clone)]
pub struct GraphqlApi {
    id: LogicalId,
    path: String,
    schema_id: LogicalId,
    schema: Arc<GraphqlSchema>,
}

impl GraphqlApi {
    pub fn new(stack: &mut Stack, id: &str, props: GraphqlApiProps) -> Result<Self> {
        if props.name.is_empty() {
            return Err(ConstructError::invalid("API name", "must not be empty"));
        }

        let api = stack.add_resource(
            &[id, "Resource"],
            "AWS::AppSync::GraphQLApi",
            Prop::object([
                ("AuthenticationType", AUTHENTICATION_TYPE.into()),
                ("Name", props.name.clone().into()),
                ("XrayEnabled", props.xray_enabled.into()),
            ]),
        )?;

        let schema_id = stack.add_resource(
            &[id, "Schema"],
            "AWS::AppSync::GraphQLSchema",
            Prop::object([
                ("ApiId", Token::get_att(&api, "ApiId").into()),
                ("Definition", props.schema.definition().into()),
            ]),
        )?;

        // No `Expires`: the service default applies and the template stays
        // reproducible.
        stack.add_resource(
            &[id, "DefaultApiKey"],
            "AWS::AppSync::ApiKey",
            Prop::object([("ApiId", Token::get_att(&api, "ApiId").into())]),
        )?;

        tracing::info!(
            api = %api,
            name = %props.name,
            authorization = AUTHENTICATION_TYPE,
            "Declared GraphQL API",
        );

        Ok(Self {
            id: api,
            path: id.to_string(),
            schema_id,
            schema: Arc::new(props.schema),
        })
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.id
    }

    pub fn api_id(&self) -> Token {
        Token::get_att(&self.id, "ApiId")
    }

    pub fn schema(&self) -> &GraphqlSchema {
        &self.schema
    }

    /// Declares a Lambda data source with a role allowed to invoke the function.
    pub fn add_lambda_data_source(
        &self,
        stack: &mut Stack,
        id: &str,
        function: &Function,
    ) -> Result<LambdaDataSource> {
        let mut chars = id.chars();
        let valid_name = chars.next().is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
            && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
        if !valid_name {
            return Err(ConstructError::InvalidId(id.to_string()));
        }

        let role = Role::for_service(
            stack,
            &[&self.path, id, "ServiceRole", "Resource"],
            "appsync.amazonaws.com",
            &[],
        )?;
        role.attach_policy(
            stack,
            &[&self.path, id, "ServiceRole", "DefaultPolicy", "Resource"],
            &[PolicyStatement::allow(
                &["lambda:InvokeFunction"],
                vec![
                    function.function_arn(),
                    Token::concat(vec![function.function_arn(), ":*".into()]),
                ],
            )],
        )?;

        let ds = stack.add_resource(
            &[&self.path, id, "Resource"],
            "AWS::AppSync::DataSource",
            Prop::object([
                ("ApiId", self.api_id().into()),
                (
                    "LambdaConfig",
                    Prop::object([("LambdaFunctionArn", function.function_arn().into())]),
                ),
                ("Name", id.into()),
                ("ServiceRoleArn", role.arn().into()),
                ("Type", "AWS_LAMBDA".into()),
            ]),
        )?;

        tracing::info!(
            data_source = %ds,
            function = %function.logical_id(),
            "Declared Lambda data source",
        );

        Ok(LambdaDataSource {
            id: ds,
            name: id.to_string(),
            api: self.clone(),
        })
    }

    /// Resolvers bound on this API, in declaration order.
    pub fn resolvers(&self, stack: &Stack) -> Vec<ResolverBinding> {
        let api_id = Prop::from(self.api_id());
        stack
            .resources_of_type("AWS::AppSync::Resolver")
            .filter(|(_, r)| r.properties().get("ApiId") == Some(&api_id))
            .filter_map(|(id, r)| {
                let p = r.properties();
                Some(ResolverBinding {
                    resolver: id.clone(),
                    type_name: p.get("TypeName")?.as_str()?.to_string(),
                    field_name: p.get("FieldName")?.as_str()?.to_string(),
                    data_source: p.get("DataSourceName")?.as_token()?.clone(),
                })
            })
            .collect()
    }
}

/// A type/field pair bound to a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverBinding {
    pub resolver: LogicalId,
    pub type_name: String,
    pub field_name: String,
    pub data_source: Token,
}

#[derive(Debug, Clone)]
pub struct LambdaDataSource {
    id: LogicalId,
    name: String,
    api: GraphqlApi,
}

impl LambdaDataSource {
    pub fn logical_id(&self) -> &LogicalId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The data source name, resolved through the template so resolvers
    /// wait for the data source.
    pub fn name_token(&self) -> Token {
        Token::get_att(&self.id, "Name")
    }

    /// Binds `type_name.field_name` to this data source. The field must exist
    /// in the schema and may be bound only once per API.
    pub fn create_resolver(
        &self,
        stack: &mut Stack,
        id: &str,
        type_name: &str,
        field_name: &str,
    ) -> Result<LogicalId> {
        if !self.api.schema.has_field(type_name, field_name) {
            return Err(ConstructError::UnknownField {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            });
        }
        if self
            .api
            .resolvers(stack)
            .iter()
            .any(|b| b.type_name == type_name && b.field_name == field_name)
        {
            return Err(ConstructError::DuplicateResolver {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            });
        }

        let resolver = stack.add_resource(
            &[&self.api.path, &self.name, id, "Resource"],
            "AWS::AppSync::Resolver",
            Prop::object([
                ("ApiId", self.api.api_id().into()),
                ("DataSourceName", self.name_token().into()),
                ("FieldName", field_name.into()),
                ("Kind", "UNIT".into()),
                ("TypeName", type_name.into()),
            ]),
        )?;
        stack.add_dependency(&resolver, &self.api.schema_id)?;

        tracing::info!(
            resolver = %resolver,
            type_name,
            field_name,
            operation = ?self.api.schema.operation_of(type_name),
            "Declared resolver",
        );
        Ok(resolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lambda::{Code, FunctionProps, Runtime};
    use crate::stack::StackProps;

    const SCHEMA: &str = r"
        type Post { id: ID! title: String! }
        input PostInput { title: String! }
        type Query { listPosts: [Post] }
        type Mutation { createPost(post: PostInput!): Post }
    ";

    fn setup() -> (Stack, GraphqlApi, Function, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.js"), "exports.handler = 1").unwrap();
        let mut stack = Stack::new("ApiStack", StackProps::default()).unwrap();
        let api = GraphqlApi::new(
            &mut stack,
            "Api",
            GraphqlApiProps {
                name: "NeptuneAPI".into(),
                schema: GraphqlSchema::parse(SCHEMA).unwrap(),
                xray_enabled: false,
            },
        )
        .unwrap();
        let function = Function::new(
            &mut stack,
            "Fn",
            FunctionProps::new(
                Runtime::Nodejs20x,
                "main.handler",
                Code::from_asset(dir.path()).unwrap(),
            ),
        )
        .unwrap();
        (stack, api, function, dir)
    }

    #[test]
    fn schema_roots_and_fields() {
        let schema = GraphqlSchema::parse(SCHEMA).unwrap();
        assert!(schema.has_field("Query", "listPosts"));
        assert!(schema.has_field("Mutation", "createPost"));
        assert!(!schema.has_field("Query", "createPost"));
        assert_eq!(schema.operation_of("Mutation"), Some(Operation::Mutation));
        assert_eq!(schema.operation_of("Post"), None);
    }

    #[test]
    fn schema_block_and_extensions() {
        let schema = GraphqlSchema::parse(
            "schema { query: Root } type Root { a: Int } extend type Root { b: Int }",
        )
        .unwrap();
        assert!(schema.has_field("Root", "b"));
        assert_eq!(schema.operation_of("Root"), Some(Operation::Query));
    }

    #[test]
    fn schema_errors() {
        assert!(matches!(
            GraphqlSchema::parse("type Query {"),
            Err(ConstructError::Schema(_))
        ));
        assert!(matches!(
            GraphqlSchema::parse("type Post { id: ID }"),
            Err(ConstructError::Schema(_))
        ));
        assert!(matches!(
            GraphqlSchema::from_asset("/no/such/schema.graphql"),
            Err(ConstructError::Asset { .. })
        ));
    }

    #[test]
    fn resolvers_bind_to_data_source() {
        let (mut stack, api, function, _dir) = setup();
        let ds = api
            .add_lambda_data_source(&mut stack, "lambdaDatasource", &function)
            .unwrap();
        ds.create_resolver(&mut stack, "LambdaQueryResolver", "Query", "listPosts")
            .unwrap();
        ds.create_resolver(&mut stack, "LambdaMutationResolver", "Mutation", "createPost")
            .unwrap();

        let bindings = api.resolvers(&stack);
        let pairs: Vec<(&str, &str)> = bindings
            .iter()
            .map(|b| (b.type_name.as_str(), b.field_name.as_str()))
            .collect();
        assert_eq!(pairs, vec![("Query", "listPosts"), ("Mutation", "createPost")]);
        assert!(bindings.iter().all(|b| b.data_source == ds.name_token()));

        let t = stack.synth().unwrap();
        assert_eq!(t.resource_count("AWS::AppSync::ApiKey"), 1);
        let ds_json = t.resource(ds.logical_id().as_str()).unwrap();
        assert_eq!(ds_json["Properties"]["Type"], "AWS_LAMBDA");
        assert_eq!(
            ds_json["Properties"]["LambdaConfig"]["LambdaFunctionArn"],
            function.function_arn().to_json()
        );
    }

    #[test]
    fn api_key_attaches_to_api() {
        let (stack, api, _function, _dir) = setup();
        let t = stack.synth().unwrap();
        let keys = t.find_resources("AWS::AppSync::ApiKey");
        assert_eq!(keys.len(), 1);

        let key = &keys[0].1["Properties"];
        assert_eq!(key["ApiId"], api.api_id().to_json());
        assert!(key.get("Expires").is_none());
        let api_json = t.resource(api.logical_id().as_str()).unwrap();
        assert_eq!(api_json["Properties"]["AuthenticationType"], "API_KEY");
    }

    #[test]
    fn unknown_and_duplicate_resolvers_rejected() {
        let (mut stack, api, function, _dir) = setup();
        let ds = api
            .add_lambda_data_source(&mut stack, "lambdaDatasource", &function)
            .unwrap();
        assert!(matches!(
            ds.create_resolver(&mut stack, "R1", "Query", "getPost"),
            Err(ConstructError::UnknownField { .. })
        ));
        ds.create_resolver(&mut stack, "R2", "Query", "listPosts").unwrap();
        assert!(matches!(
            ds.create_resolver(&mut stack, "R3", "Query", "listPosts"),
            Err(ConstructError::DuplicateResolver { .. })
        ));
    }

    #[test]
    fn invalid_data_source_name_rejected() {
        let (mut stack, api, function, _dir) = setup();
        assert!(matches!(
            api.add_lambda_data_source(&mut stack, "lambda-ds", &function),
            Err(ConstructError::InvalidId(_))
        ));
    }
}
