//! Synthesizer configuration via CLI args and environment variables.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use neptune_construct::RemovalPolicy;
use neptune_construct::lambda::Runtime;
use neptune_construct::neptune::InstanceType;

/// Synthesizes the AppSync + Neptune stack into a CloudFormation assembly.
#[derive(Parser, Debug, Clone)]
#[command(name = "appsync-neptune", version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Stack name; also the prefix of the template file.
    #[arg(
        long,
        global = true,
        default_value = "NewAppsyncNeptuneStack",
        env = "APPSYNC_NEPTUNE_STACK_NAME",
    )]
    pub stack_name: String,

    /// Directory the cloud assembly is written to.
    #[arg(long, global = true, default_value = "cdk.out", env = "APPSYNC_NEPTUNE_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// GraphQL schema file.
    #[arg(
        long,
        global = true,
        default_value = "graphql/schema.graphql",
        env = "APPSYNC_NEPTUNE_SCHEMA",
    )]
    pub schema: PathBuf,

    /// Lambda code bundle directory.
    #[arg(long, global = true, default_value = "lambda-fns", env = "APPSYNC_NEPTUNE_CODE_DIR")]
    pub code_dir: PathBuf,

    /// Stack topology.
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = Variant::Canonical,
        env = "APPSYNC_NEPTUNE_VARIANT",
    )]
    pub variant: Variant,

    /// Required to synthesize the legacy variant, which admits 0.0.0.0/0 on
    /// the database port.
    #[arg(long, global = true, env = "APPSYNC_NEPTUNE_ALLOW_INSECURE_INGRESS")]
    pub allow_insecure_ingress: bool,

    /// Lambda runtime.
    #[arg(long, global = true, default_value = "nodejs20.x", env = "APPSYNC_NEPTUNE_RUNTIME")]
    pub runtime: Runtime,

    /// Neptune instance class.
    #[arg(
        long,
        global = true,
        default_value = "db.r5.large",
        env = "APPSYNC_NEPTUNE_INSTANCE_TYPE",
    )]
    pub instance_type: InstanceType,

    /// Neptune instances (writer plus replicas).
    #[arg(long, global = true, default_value_t = 1, env = "APPSYNC_NEPTUNE_INSTANCES")]
    pub instances: usize,

    /// Lambda memory in MB.
    #[arg(long, global = true, default_value_t = 1024, env = "APPSYNC_NEPTUNE_MEMORY_SIZE")]
    pub memory_size: u32,

    /// What happens to the cluster when the stack is deleted (destroy, retain, snapshot).
    #[arg(long, global = true, default_value = "retain", env = "APPSYNC_NEPTUNE_REMOVAL_POLICY")]
    pub removal_policy: RemovalPolicy,

    /// Target account. Omit for an environment-agnostic template.
    #[arg(long, global = true, env = "APPSYNC_NEPTUNE_ACCOUNT")]
    pub account: Option<String>,

    /// Target region. Omit for an environment-agnostic template.
    #[arg(long, global = true, env = "APPSYNC_NEPTUNE_REGION")]
    pub region: Option<String>,

    /// Log level.
    #[arg(long, global = true, default_value = "info", env = "APPSYNC_NEPTUNE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, global = true, default_value = "text", env = "APPSYNC_NEPTUNE_LOG_FORMAT")]
    pub log_format: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// Write the cloud assembly (default).
    #[default]
    Synth,
    /// Print resources in deployment order.
    Order,
}

/// Which ingress topology to synthesize.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variant {
    /// VPC-scoped ingress, instrumented function, `WriteAddress`/`ReadAddress` outputs.
    #[default]
    Canonical,
    /// Database port open to the world, no instrumentation, lowercase outputs.
    Legacy,
}

impl Config {
    /// Parses configuration from CLI args and env vars.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn command(&self) -> Command {
        self.command.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_synthesize_canonical_variant() {
        let config = Config::try_parse_from(["appsync-neptune"]).unwrap();
        assert_eq!(config.command(), Command::Synth);
        assert_eq!(config.stack_name, "NewAppsyncNeptuneStack");
        assert_eq!(config.variant, Variant::Canonical);
        assert_eq!(config.instance_type, InstanceType::R5Large);
        assert_eq!(config.removal_policy, RemovalPolicy::Retain);
        assert_eq!(config.memory_size, 1024);
        assert!(!config.allow_insecure_ingress);
    }

    #[test]
    fn flags_after_subcommand() {
        let config = Config::try_parse_from([
            "appsync-neptune",
            "order",
            "--variant",
            "legacy",
            "--instance-type",
            "db.t3.medium",
            "--instances",
            "2",
        ])
        .unwrap();
        assert_eq!(config.command(), Command::Order);
        assert_eq!(config.variant, Variant::Legacy);
        assert_eq!(config.instance_type, InstanceType::T3Medium);
        assert_eq!(config.instances, 2);
    }

    #[test]
    fn rejects_unknown_instance_type() {
        let parsed = Config::try_parse_from(["appsync-neptune", "--instance-type", "db.m9.huge"]);
        assert!(parsed.is_err());
    }
}
