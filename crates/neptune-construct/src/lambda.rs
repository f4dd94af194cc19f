//! Compute unit: Lambda functions, code assets and layers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::asset::FileAsset;
use crate::ec2::{SecurityGroup, Vpc};
use crate::error::{ConstructError, Result};
use crate::iam::{PolicyStatement, Role};
use crate::prop::Prop;
use crate::stack::Stack;
use crate::token::{LogicalId, Token};

/// Memory limits accepted by the Lambda service, in MB.
pub const MIN_MEMORY_MB: u32 = 128;
pub const MAX_MEMORY_MB: u32 = 10_240;

/// Environment variable that makes the runtime start through a wrapper script.
pub const EXEC_WRAPPER_VAR: &str = "AWS_LAMBDA_EXEC_WRAPPER";
/// Wrapper script shipped by the OpenTelemetry layer.
pub const OTEL_HANDLER: &str = "/opt/otel-handler";
/// Account publishing the AWS Distro for OpenTelemetry layers.
const OTEL_LAYER_ACCOUNT: &str = "901920570463";

/// Keys the Lambda service sets itself and refuses in user configuration.
const RESERVED_ENV_KEYS: &[&str] = &[
    "_HANDLER",
    "_X_AMZN_TRACE_ID",
    "AWS_ACCESS_KEY",
    "AWS_ACCESS_KEY_ID",
    "AWS_DEFAULT_REGION",
    "AWS_EXECUTION_ENV",
    "AWS_LAMBDA_FUNCTION_MEMORY_SIZE",
    "AWS_LAMBDA_FUNCTION_NAME",
    "AWS_LAMBDA_FUNCTION_VERSION",
    "AWS_LAMBDA_INITIALIZATION_TYPE",
    "AWS_LAMBDA_LOG_GROUP_NAME",
    "AWS_LAMBDA_LOG_STREAM_NAME",
    "AWS_LAMBDA_RUNTIME_API",
    "AWS_REGION",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "LAMBDA_RUNTIME_DIR",
    "LAMBDA_TASK_ROOT",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFamily {
    NodeJs,
    Python,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Runtime {
    Nodejs14x,
    Nodejs16x,
    Nodejs18x,
    #[default]
    Nodejs20x,
    Nodejs22x,
    Python311,
    Python312,
}

impl Runtime {
    pub fn name(self) -> &'static str {
        match self {
            Self::Nodejs14x => "nodejs14.x",
            Self::Nodejs16x => "nodejs16.x",
            Self::Nodejs18x => "nodejs18.x",
            Self::Nodejs20x => "nodejs20.x",
            Self::Nodejs22x => "nodejs22.x",
            Self::Python311 => "python3.11",
            Self::Python312 => "python3.12",
        }
    }

    pub fn family(self) -> RuntimeFamily {
        match self {
            Self::Python311 | Self::Python312 => RuntimeFamily::Python,
            _ => RuntimeFamily::NodeJs,
        }
    }

    /// Runtimes the Lambda service no longer accepts for new functions.
    pub fn is_deprecated(self) -> bool {
        matches!(self, Self::Nodejs14x | Self::Nodejs16x)
    }

    fn module_extensions(self) -> &'static [&'static str] {
        match self.family() {
            RuntimeFamily::NodeJs => &["js", "mjs", "cjs"],
            RuntimeFamily::Python => &["py"],
        }
    }
}

impl FromStr for Runtime {
    type Err = ConstructError;

    fn from_str(s: &str) -> Result<Self> {
        [
            Self::Nodejs14x,
            Self::Nodejs16x,
            Self::Nodejs18x,
            Self::Nodejs20x,
            Self::Nodejs22x,
            Self::Python311,
            Self::Python312,
        ]
        .into_iter()
        .find(|r| r.name() == s)
        .ok_or_else(|| ConstructError::invalid("runtime", format!("unsupported runtime '{s}'")))
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Function code bundled from a local directory.
#[derive(Debug, Clone)]
pub struct Code {
    asset: FileAsset,
}

impl Code {
    pub fn from_asset(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            asset: FileAsset::from_directory(path.as_ref())?,
        })
    }

    pub fn path(&self) -> &Path {
        self.asset.source()
    }

    /// Checks that `handler` (`module.function`) names a module present in
    /// the bundle.
    fn ensure_handler(&self, handler: &str, runtime: Runtime) -> Result<()> {
        let missing = || ConstructError::MissingHandler {
            handler: handler.to_string(),
            path: self.path().to_path_buf(),
        };

        let (module, function) = handler.rsplit_once('.').ok_or_else(missing)?;
        if module.is_empty() || function.is_empty() {
            return Err(missing());
        }

        let module: PathBuf = match runtime.family() {
            RuntimeFamily::Python => module.replace('.', "/").into(),
            RuntimeFamily::NodeJs => module.into(),
        };
        let found = runtime
            .module_extensions()
            .iter()
            .any(|ext| self.path().join(&module).with_extension(ext).is_file());
        if found { Ok(()) } else { Err(missing()) }
    }
}

/// A layer referenced by ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerVersion {
    arn: Token,
}

impl LayerVersion {
    pub fn from_arn(arn: impl Into<Token>) -> Self {
        Self { arn: arn.into() }
    }

    /// AWS Distro for OpenTelemetry layer for the runtime, in the stack's
    /// region.
    pub fn otel(runtime: Runtime) -> Self {
        let name = match runtime.family() {
            RuntimeFamily::NodeJs => "aws-otel-nodejs-amd64-ver-1-18-1:4",
            RuntimeFamily::Python => "aws-otel-python-amd64-ver-1-25-0:1",
        };
        Self::from_arn(Token::sub(format!(
            "arn:aws:lambda:${{AWS::Region}}:{OTEL_LAYER_ACCOUNT}:layer:{name}"
        )))
    }

    pub fn arn(&self) -> &Token {
        &self.arn
    }
}

/// X-Ray tracing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tracing {
    #[default]
    Disabled,
    /// Sample and record requests.
    Active,
}

#[derive(Debug, Clone)]
pub struct FunctionProps<'a> {
    pub runtime: Runtime,
    pub handler: String,
    pub code: Code,
    pub memory_size: u32,
    pub vpc: Option<&'a Vpc>,
    pub environment: BTreeMap<String, Token>,
    pub layers: Vec<LayerVersion>,
    pub tracing: Tracing,
}

impl<'a> FunctionProps<'a> {
    pub fn new(runtime: Runtime, handler: &str, code: Code) -> Self {
        Self {
            runtime,
            handler: handler.to_string(),
            code,
            memory_size: MIN_MEMORY_MB,
            vpc: None,
            environment: BTreeMap::new(),
            layers: Vec::new(),
            tracing: Tracing::Disabled,
        }
    }
}

/// A declared Lambda function with its service role.
#[derive(Debug, Clone)]
pub struct Function {
    id: LogicalId,
    role: Role,
    security_group: Option<SecurityGroup>,
}

impl Function {
    pub fn new(stack: &mut Stack, id: &str, props: FunctionProps<'_>) -> Result<Self> {
        if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&props.memory_size) {
            return Err(ConstructError::invalid(
                "memory_size",
                format!(
                    "{} MB is outside {MIN_MEMORY_MB}..={MAX_MEMORY_MB}",
                    props.memory_size
                ),
            ));
        }
        if props.runtime.is_deprecated() {
            tracing::warn!(runtime = %props.runtime, "Runtime is deprecated for new functions");
        }
        props.code.ensure_handler(&props.handler, props.runtime)?;
        for (key, value) in &props.environment {
            validate_env(key, value)?;
        }

        let mut managed = vec!["service-role/AWSLambdaBasicExecutionRole"];
        if props.vpc.is_some() {
            managed.push("service-role/AWSLambdaVPCAccessExecutionRole");
        }
        let role = Role::for_service(
            stack,
            &[id, "ServiceRole", "Resource"],
            "lambda.amazonaws.com",
            &managed,
        )?;

        let policy = if props.tracing == Tracing::Active {
            Some(role.attach_policy(
                stack,
                &[id, "ServiceRole", "DefaultPolicy", "Resource"],
                &[PolicyStatement::allow(
                    &["xray:PutTelemetryRecords", "xray:PutTraceSegments"],
                    vec!["*".into()],
                )],
            )?)
        } else {
            None
        };

        let security_group = match props.vpc {
            Some(vpc) => Some(SecurityGroup::new(
                stack,
                &[id, "SecurityGroup"],
                vpc,
                Some(&format!("Automatic security group for Lambda Function {id}")),
            )?),
            None => None,
        };

        let location = stack.add_file_asset(props.code.asset.clone());

        let mut fn_props = BTreeMap::from([
            (
                "Code".to_string(),
                Prop::object([
                    ("S3Bucket", location.bucket.into()),
                    ("S3Key", location.object_key.into()),
                ]),
            ),
            ("Handler".to_string(), props.handler.clone().into()),
            ("MemorySize".to_string(), props.memory_size.into()),
            ("Role".to_string(), role.arn().into()),
            ("Runtime".to_string(), props.runtime.name().into()),
        ]);
        if !props.environment.is_empty() {
            fn_props.insert(
                "Environment".into(),
                Prop::object([("Variables", env_prop(&props.environment))]),
            );
        }
        if !props.layers.is_empty() {
            fn_props.insert(
                "Layers".into(),
                Prop::List(props.layers.iter().map(|l| l.arn.clone().into()).collect()),
            );
        }
        if props.tracing == Tracing::Active {
            fn_props.insert("TracingConfig".into(), Prop::object([("Mode", "Active".into())]));
        }
        if let (Some(vpc), Some(sg)) = (props.vpc, &security_group) {
            fn_props.insert(
                "VpcConfig".into(),
                Prop::object([
                    ("SecurityGroupIds", Prop::List(vec![sg.group_id().into()])),
                    ("SubnetIds", vpc.private_subnet_ids().into()),
                ]),
            );
        }

        let fn_id =
            stack.add_resource(&[id, "Resource"], "AWS::Lambda::Function", fn_props.into())?;
        stack.add_dependency(&fn_id, role.logical_id())?;
        if let Some(policy) = &policy {
            stack.add_dependency(&fn_id, policy)?;
        }
        if let Some(vpc) = props.vpc {
            let routes: Vec<LogicalId> = vpc.private_default_routes().cloned().collect();
            for route in &routes {
                stack.add_dependency(&fn_id, route)?;
            }
        }

        tracing::info!(
            function = %fn_id,
            runtime = %props.runtime,
            handler = %props.handler,
            memory_mb = props.memory_size,
            vpc = props.vpc.is_some(),
            "Declared Lambda function",
        );

        Ok(Self {
            id: fn_id,
            role,
            security_group,
        })
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.id
    }

    pub fn function_arn(&self) -> Token {
        Token::get_att(&self.id, "Arn")
    }

    pub fn function_name(&self) -> Token {
        Token::reference(&self.id)
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn security_group(&self) -> Option<&SecurityGroup> {
        self.security_group.as_ref()
    }

    /// Sets an environment variable after the function is declared. The value
    /// may be a token belonging to a resource declared later; the function
    /// then depends on that resource.
    pub fn add_environment(
        &self,
        stack: &mut Stack,
        key: &str,
        value: impl Into<Token>,
    ) -> Result<()> {
        let value = value.into();
        validate_env(key, &value)?;

        let resource = stack.expect_resource_mut(&self.id)?;
        let Some(vars) = resource
            .properties_mut()
            .entry_map("Environment")
            .and_then(|env| {
                let slot = env.entry("Variables".to_string()).or_insert_with(Prop::map);
                slot.as_map_mut()
            })
        else {
            return Err(ConstructError::invalid(
                "Environment",
                "function properties are not a map",
            ));
        };

        tracing::debug!(
            function = %self.id,
            key,
            deferred = value.is_unresolved(),
            "Set environment variable",
        );
        vars.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Environment variables as currently declared.
    pub fn environment(&self, stack: &Stack) -> BTreeMap<String, Token> {
        stack
            .resource(&self.id)
            .and_then(|r| r.properties().at(&["Environment", "Variables"]))
            .and_then(|vars| match vars {
                Prop::Map(m) => Some(
                    m.iter()
                        .filter_map(|(k, v)| v.as_token().map(|t| (k.clone(), t.clone())))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default()
    }
}

fn env_prop(env: &BTreeMap<String, Token>) -> Prop {
    Prop::Map(
        env.iter()
            .map(|(k, v)| (k.clone(), v.clone().into()))
            .collect(),
    )
}

fn validate_env(key: &str, value: &Token) -> Result<()> {
    let mut chars = key.chars();
    let well_formed = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed {
        return Err(ConstructError::invalid(
            format!("environment variable '{key}'"),
            "keys must start with a letter and contain only letters, digits and '_'",
        ));
    }
    if RESERVED_ENV_KEYS.contains(&key) {
        return Err(ConstructError::invalid(
            format!("environment variable '{key}'"),
            "key is reserved by the Lambda runtime",
        ));
    }
    if value.as_literal().is_some_and(str::is_empty) {
        return Err(ConstructError::invalid(
            format!("environment variable '{key}'"),
            "value must not be empty",
        ));
    }
    Ok(())
}
