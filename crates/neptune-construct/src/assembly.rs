//! Cloud assembly output.
//!
//! The assembly is the directory handed to the deployment tool: the stack
//! template, an asset manifest describing what to upload where, and the
//! top-level `manifest.json`. This module only produces file contents; the
//! caller decides where and how to write them.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use crate::stack::Stack;
use crate::template::Template;
use crate::token::Token;

/// Cloud assembly schema version written to the manifests.
pub const ASSEMBLY_VERSION: &str = "36.0.0";
/// Qualifier of the default bootstrap stack.
pub const BOOTSTRAP_QUALIFIER: &str = "hnb659fds";
/// Minimum bootstrap stack version the template requires.
pub const REQUIRED_BOOTSTRAP_VERSION: u32 = 6;

/// A file of the assembly directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyFile {
    pub name: String,
    pub contents: String,
}

/// Bootstrap bucket that file assets are published to.
pub fn assets_bucket() -> Token {
    Token::sub(assets_bucket_name())
}

const ACCOUNT: &str = "${AWS::AccountId}";
const REGION: &str = "${AWS::Region}";

/// Bucket name with `${AWS::AccountId}`/`${AWS::Region}` placeholders, as both
/// the template and the asset manifest spell it.
fn assets_bucket_name() -> String {
    format!("cdk-{BOOTSTRAP_QUALIFIER}-assets-{ACCOUNT}-{REGION}")
}

fn role_arn(kind: &str) -> String {
    let role = format!("cdk-{BOOTSTRAP_QUALIFIER}-{kind}-{ACCOUNT}-{REGION}");
    format!("arn:${{AWS::Partition}}:iam::{ACCOUNT}:role/{role}")
}

fn bootstrap_ssm_parameter() -> String {
    format!("/cdk-bootstrap/{BOOTSTRAP_QUALIFIER}/version")
}

/// The `BootstrapVersion` parameter and the rule that rejects environments
/// bootstrapped with an older stack.
pub(crate) fn bootstrap_checks() -> (BTreeMap<String, Value>, BTreeMap<String, Value>) {
    let parameters = BTreeMap::from([(
        "BootstrapVersion".to_string(),
        json!({
            "Type": "AWS::SSM::Parameter::Value<String>",
            "Default": bootstrap_ssm_parameter(),
            "Description": concat!(
                "Version of the CDK Bootstrap resources in this environment, ",
                "automatically retrieved from SSM Parameter Store. [cdk:skip]"
            )
        }),
    )]);

    let old_versions: Vec<String> =
        (1..REQUIRED_BOOTSTRAP_VERSION).map(|v| v.to_string()).collect();
    let rules = BTreeMap::from([(
        "CheckBootstrapVersion".to_string(),
        json!({
            "Assertions": [{
                "Assert": {
                    "Fn::Not": [{ "Fn::Contains": [old_versions, { "Ref": "BootstrapVersion" }] }]
                },
                "AssertDescription": format!(
                    "CDK bootstrap stack version {REQUIRED_BOOTSTRAP_VERSION} required. {}",
                    "Please run 'cdk bootstrap' with a recent version of the CDK CLI."
                )
            }]
        }),
    )]);

    (parameters, rules)
}

pub fn template_file_name(stack: &Stack) -> String {
    format!("{}.template.json", stack.name())
}

pub fn asset_manifest_file_name(stack: &Stack) -> String {
    format!("{}.assets.json", stack.name())
}

fn asset_manifest(stack: &Stack) -> Value {
    let destination_key = "current_account-current_region";
    let files: serde_json::Map<String, Value> = stack
        .assets()
        .map(|asset| {
            (
                asset.hash().to_string(),
                json!({
                    "source": {
                        "path": asset.source().to_string_lossy(),
                        "packaging": asset.packaging().as_str(),
                    },
                    "destinations": {
                        destination_key: {
                            "bucketName": assets_bucket_name(),
                            "objectKey": asset.object_key(),
                            "assumeRoleArn": role_arn("file-publishing-role"),
                        }
                    }
                }),
            )
        })
        .collect();

    json!({
        "version": ASSEMBLY_VERSION,
        "files": files,
        "dockerImages": {},
    })
}

fn manifest(stack: &Stack) -> Value {
    let name = stack.name();
    let assets_artifact = format!("{name}.assets");
    json!({
        "version": ASSEMBLY_VERSION,
        "artifacts": {
            assets_artifact.clone(): {
                "type": "cdk:asset-manifest",
                "properties": {
                    "file": asset_manifest_file_name(stack),
                    "requiresBootstrapStackVersion": REQUIRED_BOOTSTRAP_VERSION,
                    "bootstrapStackVersionSsmParameter": bootstrap_ssm_parameter(),
                }
            },
            name: {
                "type": "aws:cloudformation:stack",
                "environment": stack.env().uri(),
                "properties": {
                    "templateFile": template_file_name(stack),
                    "validateOnSynth": false,
                    "assumeRoleArn": role_arn("deploy-role"),
                    "cloudFormationExecutionRoleArn": role_arn("cfn-exec-role"),
                    "requiresBootstrapStackVersion": REQUIRED_BOOTSTRAP_VERSION,
                    "bootstrapStackVersionSsmParameter": bootstrap_ssm_parameter(),
                },
                "dependencies": [assets_artifact],
                "displayName": name,
            }
        }
    })
}

/// Renders every file of the assembly for one stack.
pub fn cloud_assembly(
    stack: &Stack,
    template: &Template,
) -> Result<Vec<AssemblyFile>, serde_json::Error> {
    Ok(vec![
        AssemblyFile {
            name: template_file_name(stack),
            contents: template.to_json_pretty()?,
        },
        AssemblyFile {
            name: asset_manifest_file_name(stack),
            contents: serde_json::to_string_pretty(&asset_manifest(stack))?,
        },
        AssemblyFile {
            name: "manifest.json".to_string(),
            contents: serde_json::to_string_pretty(&manifest(stack))?,
        },
        AssemblyFile {
            name: "cdk.out".to_string(),
            contents: serde_json::to_string(&json!({ "version": ASSEMBLY_VERSION }))?,
        },
    ])
}
