//! Synthesized CloudFormation template.
//!
//! Rendering is a pure function of the stack: maps are ordered, so the same
//! declarations always produce byte-identical JSON.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::assembly;
use crate::stack::Stack;

/// A rendered template plus lookup helpers for inspecting it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    resources: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    outputs: BTreeMap<String, Value>,
    parameters: BTreeMap<String, Value>,
    rules: BTreeMap<String, Value>,
}

impl Template {
    pub(crate) fn render(stack: &Stack) -> Self {
        let mut resources = BTreeMap::new();
        for id in stack.logical_ids() {
            let Some(res) = stack.resource(id) else {
                continue;
            };

            let mut body = Map::new();
            body.insert("Type".into(), Value::String(res.resource_type().to_string()));

            let props = res.properties().to_json();
            if props.as_object().is_none_or(|m| !m.is_empty()) {
                body.insert("Properties".into(), props);
            }

            if !res.depends_on().is_empty() {
                body.insert(
                    "DependsOn".into(),
                    Value::Array(
                        res.depends_on()
                            .iter()
                            .map(|d| Value::String(d.to_string()))
                            .collect(),
                    ),
                );
            }

            if let Some(policy) = res.removal_policy() {
                body.insert("UpdateReplacePolicy".into(), json!(policy.as_str()));
                body.insert("DeletionPolicy".into(), json!(policy.as_str()));
            }

            body.insert(
                "Metadata".into(),
                json!({ "aws:cdk:path": format!("{}/{}", stack.name(), res.path()) }),
            );

            resources.insert(id.to_string(), Value::Object(body));
        }

        let outputs = stack
            .outputs()
            .iter()
            .map(|(name, out)| {
                let mut body = Map::new();
                if let Some(desc) = &out.description {
                    body.insert("Description".into(), json!(desc));
                }
                body.insert("Value".into(), out.value.to_json());
                (name.clone(), Value::Object(body))
            })
            .collect();

        let (parameters, rules) = assembly::bootstrap_checks();

        Self {
            description: stack.description().map(str::to_string),
            resources,
            outputs,
            parameters,
            rules,
        }
    }

    pub fn resources(&self) -> &BTreeMap<String, Value> {
        &self.resources
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Value> {
        self.resources.get(logical_id)
    }

    /// Resources of one type, keyed by logical ID.
    pub fn find_resources(&self, resource_type: &str) -> Vec<(&str, &Value)> {
        self.resources
            .iter()
            .filter(|(_, r)| r["Type"] == resource_type)
            .map(|(id, r)| (id.as_str(), r))
            .collect()
    }

    pub fn resource_count(&self, resource_type: &str) -> usize {
        self.find_resources(resource_type).len()
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn to_json(&self) -> Value {
        // Map keys are strings and values are already JSON.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prop::Prop;
    use crate::stack::{RemovalPolicy, StackProps};
    use crate::token::Token;

    #[test]
    fn renders_resource_sections() {
        let mut stack = Stack::new(
            "Demo",
            StackProps {
                description: Some("demo".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let a = stack.add_resource(&["A"], "AWS::Test::A", Prop::map()).unwrap();
        let b = stack
            .add_resource(
                &["B", "Resource"],
                "AWS::Test::B",
                Prop::object([("Target", Token::reference(&a).into())]),
            )
            .unwrap();
        stack.add_dependency(&b, &a).unwrap();
        stack.set_removal_policy(&b, RemovalPolicy::Retain).unwrap();
        stack
            .add_output("Out", Token::get_att(&b, "Arn"), Some("the arn"))
            .unwrap();

        let t = stack.synth().unwrap();
        let json = t.to_json();

        assert_eq!(json["Description"], "demo");
        assert_eq!(json["Resources"]["A"], json!({
            "Type": "AWS::Test::A",
            "Metadata": { "aws:cdk:path": "Demo/A" }
        }));
        let b_json = &json["Resources"][b.as_str()];
        assert_eq!(b_json["Properties"]["Target"], json!({ "Ref": "A" }));
        assert_eq!(b_json["DependsOn"], json!(["A"]));
        assert_eq!(b_json["DeletionPolicy"], "Retain");
        assert_eq!(b_json["UpdateReplacePolicy"], "Retain");
        assert_eq!(
            json["Outputs"]["Out"],
            json!({ "Description": "the arn", "Value": { "Fn::GetAtt": [b.as_str(), "Arn"] } })
        );
        assert!(json["Parameters"]["BootstrapVersion"].is_object());
        assert!(json["Rules"]["CheckBootstrapVersion"].is_object());
        assert_eq!(t.resource_count("AWS::Test::B"), 1);
    }

    #[test]
    fn render_is_deterministic() {
        let build = || {
            let mut s = Stack::new("Demo", StackProps::default()).unwrap();
            for name in ["Zed", "Alpha", "Mid"] {
                s.add_resource(&[name], "AWS::Test::X", Prop::map()).unwrap();
            }
            s.synth().unwrap().to_json_pretty().unwrap()
        };
        assert_eq!(build(), build());
    }
}
