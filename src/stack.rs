//! The AppSync + Neptune stack.
//!
//! Declaration order: API, VPC, function, data source and resolvers,
//! cluster, ingress, outputs, then the function's database environment.
//! The function is declared before the cluster; the `WRITER`/`READER`
//! tokens make it depend on the cluster at deploy time.

use std::path::PathBuf;

use neptune_construct::appsync::{GraphqlApi, GraphqlApiProps, GraphqlSchema, LambdaDataSource};
use neptune_construct::assembly::{self, AssemblyFile};
use neptune_construct::ec2::{Peer, Vpc, VpcProps};
use neptune_construct::lambda::{
    self, Code, Function, FunctionProps, LayerVersion, Runtime, Tracing,
};
use neptune_construct::neptune::{DatabaseCluster, DatabaseClusterProps, InstanceType};
use neptune_construct::stack::Environment;
use neptune_construct::{LogicalId, RemovalPolicy, Stack, StackProps, Template, Token};

use crate::config::{Config, Variant};
use crate::error::{AppError, Result};

pub const API_NAME: &str = "NeptuneAPI";
pub const HANDLER: &str = "main.handler";
pub const DEFAULT_STACK_NAME: &str = "NewAppsyncNeptuneStack";
const DESCRIPTION: &str = "AppSync GraphQL API backed by a VPC Lambda and a Neptune cluster";

/// Root fields bound to the Lambda data source: (construct id, type, field).
const RESOLVERS: [(&str, &str, &str); 2] = [
    ("LambdaQueryResolver", "Query", "listPosts"),
    ("LambdaMutationResolver", "Mutation", "createPost"),
];

/// Everything the stack composition needs, independent of how it was parsed.
#[derive(Debug, Clone)]
pub struct StackSettings {
    pub stack_name: String,
    pub schema: PathBuf,
    pub code_dir: PathBuf,
    pub variant: Variant,
    pub allow_insecure_ingress: bool,
    pub runtime: Runtime,
    pub instance_type: InstanceType,
    pub instances: usize,
    pub memory_size: u32,
    pub removal_policy: RemovalPolicy,
    pub env: Environment,
}

impl StackSettings {
    /// Canonical defaults for the given schema file and code directory.
    pub fn new(schema: impl Into<PathBuf>, code_dir: impl Into<PathBuf>) -> Self {
        Self {
            stack_name: DEFAULT_STACK_NAME.to_string(),
            schema: schema.into(),
            code_dir: code_dir.into(),
            variant: Variant::Canonical,
            allow_insecure_ingress: false,
            runtime: Runtime::default(),
            instance_type: InstanceType::R5Large,
            instances: 1,
            memory_size: 1024,
            removal_policy: RemovalPolicy::Retain,
            env: Environment::default(),
        }
    }
}

impl From<&Config> for StackSettings {
    fn from(config: &Config) -> Self {
        Self {
            stack_name: config.stack_name.clone(),
            schema: config.schema.clone(),
            code_dir: config.code_dir.clone(),
            variant: config.variant,
            allow_insecure_ingress: config.allow_insecure_ingress,
            runtime: config.runtime,
            instance_type: config.instance_type,
            instances: config.instances,
            memory_size: config.memory_size,
            removal_policy: config.removal_policy,
            env: Environment {
                account: config.account.clone(),
                region: config.region.clone(),
            },
        }
    }
}

/// The declared stack together with handles to its constructs.
#[derive(Debug)]
pub struct AppsyncNeptuneStack {
    stack: Stack,
    variant: Variant,
    api: GraphqlApi,
    vpc: Vpc,
    function: Function,
    data_source: LambdaDataSource,
    resolvers: Vec<LogicalId>,
    cluster: DatabaseCluster,
}

impl AppsyncNeptuneStack {
    pub fn new(settings: &StackSettings) -> Result<Self> {
        if settings.variant == Variant::Legacy {
            if !settings.allow_insecure_ingress {
                return Err(AppError::InsecureIngress);
            }
            tracing::warn!(
                stack = %settings.stack_name,
                "Synthesizing legacy variant with the database open to the internet",
            );
        }
        let instrumented = settings.variant == Variant::Canonical;

        let mut stack = Stack::new(
            &settings.stack_name,
            StackProps {
                description: Some(DESCRIPTION.into()),
                env: settings.env.clone(),
            },
        )?;

        let api = GraphqlApi::new(
            &mut stack,
            "Api",
            GraphqlApiProps {
                name: API_NAME.to_string(),
                schema: GraphqlSchema::from_asset(&settings.schema)?,
                xray_enabled: instrumented,
            },
        )?;

        let vpc = Vpc::new(&mut stack, "NewNeptuneVPC", VpcProps::default())?;

        let code = Code::from_asset(&settings.code_dir)?;
        let mut fn_props = FunctionProps::new(settings.runtime, HANDLER, code);
        fn_props.memory_size = settings.memory_size;
        fn_props.vpc = Some(&vpc);
        if instrumented {
            fn_props.layers.push(LayerVersion::otel(settings.runtime));
            fn_props
                .environment
                .insert(lambda::EXEC_WRAPPER_VAR.to_string(), lambda::OTEL_HANDLER.into());
            fn_props.tracing = Tracing::Active;
        }
        let function = Function::new(&mut stack, "Lambda Function", fn_props)?;

        let data_source = api.add_lambda_data_source(&mut stack, "lambdaDatasource", &function)?;
        let resolvers = RESOLVERS
            .iter()
            .map(|(id, type_name, field_name)| {
                data_source.create_resolver(&mut stack, id, type_name, field_name)
            })
            .collect::<neptune_construct::Result<Vec<_>>>()?;

        let mut cluster_props = DatabaseClusterProps::new(&vpc, settings.instance_type);
        cluster_props.instances = settings.instances;
        cluster_props.removal_policy = settings.removal_policy;
        let cluster = DatabaseCluster::new(&mut stack, "NeptuneCluster", cluster_props)?;

        match settings.variant {
            Variant::Canonical => cluster.allow_default_port_from(
                &mut stack,
                &Peer::ipv4(vpc.cidr_block()),
                "Allow traffic from within the VPC",
            )?,
            Variant::Legacy => {
                cluster.allow_default_port_from_any_ipv4(&mut stack, "Open to the world")?;
            }
        }

        let write_address = cluster.cluster_endpoint().socket_address();
        let read_address = cluster.cluster_read_endpoint().socket_address();

        let (write_output, read_output) = output_names(settings.variant);
        stack.add_output(
            write_output,
            write_address.clone(),
            Some("Neptune writer endpoint (host:port)"),
        )?;
        stack.add_output(
            read_output,
            read_address.clone(),
            Some("Neptune reader endpoint (host:port)"),
        )?;

        function.add_environment(&mut stack, "WRITER", write_address)?;
        function.add_environment(&mut stack, "READER", read_address)?;

        tracing::info!(
            stack = %stack.name(),
            variant = ?settings.variant,
            instrumented,
            "Declared stack",
        );

        Ok(Self {
            stack,
            variant: settings.variant,
            api,
            vpc,
            function,
            data_source,
            resolvers,
            cluster,
        })
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn api(&self) -> &GraphqlApi {
        &self.api
    }

    pub fn vpc(&self) -> &Vpc {
        &self.vpc
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn data_source(&self) -> &LambdaDataSource {
        &self.data_source
    }

    pub fn resolvers(&self) -> &[LogicalId] {
        &self.resolvers
    }

    pub fn cluster(&self) -> &DatabaseCluster {
        &self.cluster
    }

    /// Environment variable values as they will be deployed.
    pub fn function_environment(&self) -> std::collections::BTreeMap<String, Token> {
        self.function.environment(&self.stack)
    }

    pub fn synth(&self) -> Result<Template> {
        Ok(self.stack.synth()?)
    }

    /// The template plus the manifests of the cloud assembly directory.
    pub fn assembly(&self) -> Result<Vec<AssemblyFile>> {
        let template = self.synth()?;
        Ok(assembly::cloud_assembly(&self.stack, &template)?)
    }

    /// Logical IDs in an order the provisioning engine can create them.
    pub fn deployment_order(&self) -> Result<Vec<LogicalId>> {
        Ok(self.stack.deployment_order()?)
    }
}

/// Output names for the writer and reader addresses.
pub fn output_names(variant: Variant) -> (&'static str, &'static str) {
    match variant {
        Variant::Canonical => ("WriteAddress", "ReadAddress"),
        Variant::Legacy => ("writeaddress", "readaddress"),
    }
}
