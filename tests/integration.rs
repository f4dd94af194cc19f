//! Integration tests for the synthesized AppSync + Neptune stack.
//!
//! Each test declares the stack from the repository's own schema and code
//! bundle, synthesizes it and inspects the resulting template.

use std::path::PathBuf;

use appsync_neptune::command;
use appsync_neptune::config::{Config, Variant};
use appsync_neptune::error::AppError;
use appsync_neptune::{AppsyncNeptuneStack, StackSettings};
use clap::Parser;
use neptune_construct::ConstructError;
use serde_json::{Value, json};

fn repo_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn settings() -> StackSettings {
    let mut s = StackSettings::new(repo_path("graphql/schema.graphql"), repo_path("lambda-fns"));
    s.stack_name = "MyTestStack".into();
    s
}

fn legacy_settings() -> StackSettings {
    let mut s = settings();
    s.variant = Variant::Legacy;
    s.allow_insecure_ingress = true;
    s
}

fn only<'a>(
    template: &'a neptune_construct::Template,
    resource_type: &str,
) -> (&'a str, &'a Value) {
    let found = template.find_resources(resource_type);
    assert_eq!(found.len(), 1, "expected one {resource_type}");
    found[0]
}

fn socket_address(cluster: &str, host_attribute: &str) -> Value {
    json!({ "Fn::Join": ["", [
        { "Fn::GetAtt": [cluster, host_attribute] },
        ":",
        { "Fn::GetAtt": [cluster, "Port"] }
    ]]})
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

#[test]
fn default_stack_synthesizes() {
    let app = AppsyncNeptuneStack::new(&settings()).unwrap();
    let template = app.synth().unwrap();
    assert!(!template.resources().is_empty());
}

#[test]
fn declares_one_of_each_core_resource() {
    let template = AppsyncNeptuneStack::new(&settings()).unwrap().synth().unwrap();

    assert_eq!(template.resource_count("AWS::EC2::VPC"), 1);
    assert_eq!(template.resource_count("AWS::Lambda::Function"), 1);
    assert_eq!(template.resource_count("AWS::AppSync::GraphQLApi"), 1);
    assert_eq!(template.resource_count("AWS::AppSync::DataSource"), 1);
    assert_eq!(template.resource_count("AWS::AppSync::Resolver"), 2);
    assert_eq!(template.resource_count("AWS::Neptune::DBCluster"), 1);
    assert_eq!(template.resource_count("AWS::Neptune::DBInstance"), 1);

    let (_, api) = only(&template, "AWS::AppSync::GraphQLApi");
    assert_eq!(api["Properties"]["Name"], "NeptuneAPI");
    assert_eq!(api["Properties"]["AuthenticationType"], "API_KEY");
}

#[test]
fn synthesis_is_deterministic() {
    let render = || {
        AppsyncNeptuneStack::new(&settings())
            .unwrap()
            .synth()
            .unwrap()
            .to_json_pretty()
            .unwrap()
    };
    assert_eq!(render(), render());
}

// ---------------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------------

#[test]
fn resolvers_bind_list_posts_and_create_post_to_lambda() {
    let app = AppsyncNeptuneStack::new(&settings()).unwrap();
    let template = app.synth().unwrap();
    let (ds_id, ds) = only(&template, "AWS::AppSync::DataSource");
    assert_eq!(ds["Properties"]["Type"], "AWS_LAMBDA");

    let mut pairs: Vec<(String, String)> = template
        .find_resources("AWS::AppSync::Resolver")
        .into_iter()
        .map(|(_, r)| {
            assert_eq!(
                r["Properties"]["DataSourceName"],
                json!({ "Fn::GetAtt": [ds_id, "Name"] })
            );
            (
                r["Properties"]["TypeName"].as_str().unwrap().to_string(),
                r["Properties"]["FieldName"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    pairs.sort();
    assert_eq!(
        pairs,
        vec![
            ("Mutation".to_string(), "createPost".to_string()),
            ("Query".to_string(), "listPosts".to_string()),
        ]
    );

    let bindings = app.api().resolvers(app.stack());
    assert_eq!(bindings.len(), 2);
    assert!(bindings.iter().all(|b| b.data_source == app.data_source().name_token()));
}

#[test]
fn schema_without_bound_field_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let schema = dir.path().join("schema.graphql");
    std::fs::write(&schema, "type Query { listPosts: [String] }\n").unwrap();

    let mut s = settings();
    s.schema = schema;
    let err = AppsyncNeptuneStack::new(&s).unwrap_err();
    assert!(matches!(
        err,
        AppError::Construct(ConstructError::UnknownField { ref type_name, ref field_name })
            if type_name == "Mutation" && field_name == "createPost"
    ));
}

// ---------------------------------------------------------------------------
// Environment and outputs
// ---------------------------------------------------------------------------

#[test]
fn function_environment_carries_cluster_socket_addresses() {
    let app = AppsyncNeptuneStack::new(&settings()).unwrap();
    let template = app.synth().unwrap();
    let cluster = app.cluster().logical_id().as_str();

    let (_, function) = only(&template, "AWS::Lambda::Function");
    let vars = &function["Properties"]["Environment"]["Variables"];
    assert_eq!(vars["WRITER"], socket_address(cluster, "Endpoint"));
    assert_eq!(vars["READER"], socket_address(cluster, "ReadEndpoint"));

    let env = app.function_environment();
    assert!(env["WRITER"].is_unresolved());
    assert!(env["READER"].is_unresolved());

    assert_eq!(
        template.output("WriteAddress").unwrap()["Value"],
        socket_address(cluster, "Endpoint")
    );
    assert_eq!(
        template.output("ReadAddress").unwrap()["Value"],
        socket_address(cluster, "ReadEndpoint")
    );
}

#[test]
fn canonical_function_is_instrumented() {
    let template = AppsyncNeptuneStack::new(&settings()).unwrap().synth().unwrap();
    let (_, function) = only(&template, "AWS::Lambda::Function");
    let props = &function["Properties"];

    assert_eq!(props["MemorySize"], 1024);
    assert_eq!(props["Handler"], "main.handler");
    assert_eq!(props["Environment"]["Variables"]["AWS_LAMBDA_EXEC_WRAPPER"], "/opt/otel-handler");
    assert_eq!(props["TracingConfig"]["Mode"], "Active");
    assert_eq!(
        props["Layers"][0],
        json!({ "Fn::Sub": concat!(
            "arn:aws:lambda:${AWS::Region}:901920570463:",
            "layer:aws-otel-nodejs-amd64-ver-1-18-1:4"
        ) })
    );
    assert_eq!(props["VpcConfig"]["SubnetIds"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Ingress variants
// ---------------------------------------------------------------------------

#[test]
fn canonical_ingress_is_scoped_to_vpc_cidr() {
    let app = AppsyncNeptuneStack::new(&settings()).unwrap();
    let template = app.synth().unwrap();
    let sg = template
        .resource(app.cluster().security_group().logical_id().as_str())
        .unwrap();

    let rules = sg["Properties"]["SecurityGroupIngress"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(
        rules[0]["CidrIp"],
        json!({ "Fn::GetAtt": [app.vpc().logical_id().as_str(), "CidrBlock"] })
    );
    assert_eq!(rules[0]["FromPort"], 8182);
    assert_eq!(rules[0]["ToPort"], 8182);
}

#[test]
fn legacy_variant_requires_opt_in() {
    let mut s = settings();
    s.variant = Variant::Legacy;
    assert!(matches!(AppsyncNeptuneStack::new(&s), Err(AppError::InsecureIngress)));
}

#[test]
fn legacy_variant_opens_port_and_uses_lowercase_outputs() {
    let app = AppsyncNeptuneStack::new(&legacy_settings()).unwrap();
    let template = app.synth().unwrap();

    let sg = template
        .resource(app.cluster().security_group().logical_id().as_str())
        .unwrap();
    assert_eq!(sg["Properties"]["SecurityGroupIngress"][0]["CidrIp"], "0.0.0.0/0");
    assert_eq!(
        sg["Properties"]["SecurityGroupIngress"][0]["Description"],
        "Open to the world"
    );

    assert!(template.output("writeaddress").is_some());
    assert!(template.output("readaddress").is_some());
    assert!(template.output("WriteAddress").is_none());
    assert!(template.output("writeaddress").unwrap().get("Export").is_none());

    let (_, function) = only(&template, "AWS::Lambda::Function");
    assert!(function["Properties"].get("Layers").is_none());
    assert!(function["Properties"].get("TracingConfig").is_none());
    assert!(function["Properties"].get("Timeout").is_none());
    assert!(
        function["Properties"]["Environment"]["Variables"]
            .get("AWS_LAMBDA_EXEC_WRAPPER")
            .is_none()
    );
}

// ---------------------------------------------------------------------------
// Deployment order
// ---------------------------------------------------------------------------

#[test]
fn cluster_deploys_before_function() {
    let app = AppsyncNeptuneStack::new(&settings()).unwrap();
    let order = app.deployment_order().unwrap();
    let position = |id: &neptune_construct::LogicalId| {
        order.iter().position(|o| o == id).unwrap()
    };

    let function = position(app.function().logical_id());
    let cluster = position(app.cluster().logical_id());
    let vpc = position(app.vpc().logical_id());
    let data_source = position(app.data_source().logical_id());

    assert!(cluster < function, "cluster must precede the function");
    assert!(vpc < cluster && vpc < function);
    assert!(function < data_source);
    for resolver in app.resolvers() {
        assert!(data_source < position(resolver));
    }
    assert_eq!(order.len(), app.stack().logical_ids().len());
}

#[test]
fn function_declared_before_cluster_but_depends_on_it() {
    let app = AppsyncNeptuneStack::new(&settings()).unwrap();
    let declared = app.stack().logical_ids();
    let function = declared
        .iter()
        .position(|id| id == app.function().logical_id())
        .unwrap();
    let cluster = declared
        .iter()
        .position(|id| id == app.cluster().logical_id())
        .unwrap();
    assert!(function < cluster);
    assert!(
        app.stack()
            .dependencies_of(app.function().logical_id())
            .contains(app.cluster().logical_id())
    );
}

// ---------------------------------------------------------------------------
// Cloud assembly
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assembly_written_to_output_dir() {
    let out = tempfile::tempdir().unwrap();
    let app = AppsyncNeptuneStack::new(&settings()).unwrap();
    let files = app.assembly().unwrap();
    let paths = appsync_neptune::output::write_assembly(out.path(), files)
        .await
        .unwrap();

    let names: Vec<String> = paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        ["MyTestStack.template.json", "MyTestStack.assets.json", "manifest.json", "cdk.out"]
    );

    let written = std::fs::read_to_string(out.path().join("MyTestStack.template.json")).unwrap();
    let template: Value = serde_json::from_str(&written).unwrap();
    assert_eq!(template, app.synth().unwrap().to_json());
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn config(args: &[&str]) -> Config {
    let schema = repo_path("graphql/schema.graphql");
    let code_dir = repo_path("lambda-fns");
    let mut argv = vec![
        "appsync-neptune".to_string(),
        "--schema".to_string(),
        schema.display().to_string(),
        "--code-dir".to_string(),
        code_dir.display().to_string(),
    ];
    argv.extend(args.iter().map(ToString::to_string));
    Config::try_parse_from(argv).unwrap()
}

#[tokio::test]
async fn order_lists_every_resource_cluster_before_function() {
    let config = config(&["order"]);
    let mut out = Vec::new();
    command::run(&config, &mut out).await.unwrap();

    let listing = String::from_utf8(out).unwrap();
    let lines: Vec<(&str, &str)> = listing
        .lines()
        .map(|line| line.split_once('\t').unwrap())
        .collect();

    let app = AppsyncNeptuneStack::new(&StackSettings::from(&config)).unwrap();
    assert_eq!(lines.len(), app.synth().unwrap().resources().len());
    let expected: Vec<String> = app
        .deployment_order()
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    let listed: Vec<&str> = lines.iter().map(|(id, _)| *id).collect();
    assert_eq!(listed, expected);

    let pos = |ty: &str| lines.iter().position(|(_, t)| *t == ty).unwrap();
    assert!(pos("AWS::Neptune::DBCluster") < pos("AWS::Lambda::Function"));
}

#[tokio::test]
async fn legacy_command_without_opt_in_fails() {
    let config = config(&["order", "--variant", "legacy"]);
    let mut out = Vec::new();
    let err = command::run(&config, &mut out).await.unwrap_err();
    assert!(matches!(err, AppError::InsecureIngress));
    assert!(out.is_empty());
}

#[tokio::test]
async fn synth_command_writes_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("cdk.out");
    let config = config(&["synth", "--output-dir", out_dir.to_str().unwrap()]);
    let mut out = Vec::new();
    command::run(&config, &mut out).await.unwrap();

    assert!(out.is_empty());
    assert!(out_dir.join("NewAppsyncNeptuneStack.template.json").is_file());
    assert!(out_dir.join("manifest.json").is_file());
}
