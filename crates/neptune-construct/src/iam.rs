//! IAM roles and inline policies for service principals.

use crate::error::Result;
use crate::prop::Prop;
use crate::stack::Stack;
use crate::token::{LogicalId, Pseudo, Token};

const POLICY_VERSION: &str = "2012-10-17";

/// ARN of an AWS managed policy, e.g. `service-role/AWSLambdaBasicExecutionRole`.
pub fn managed_policy_arn(name: &str) -> Token {
    Token::concat(vec![
        "arn:".into(),
        Pseudo::Partition.into(),
        format!(":iam::aws:policy/{name}").into(),
    ])
}

/// An `Allow` statement.
#[derive(Debug, Clone)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<Token>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<Token>) -> Self {
        Self {
            actions: actions.iter().map(|a| (*a).to_string()).collect(),
            resources,
        }
    }

    fn to_prop(&self) -> Prop {
        Prop::object([
            ("Action", one_or_many(self.actions.iter().map(|a| Prop::from(a.as_str())).collect())),
            ("Effect", "Allow".into()),
            ("Resource", one_or_many(self.resources.iter().cloned().map(Prop::from).collect())),
        ])
    }
}

/// Single-element lists render as a scalar, the way policy documents are
/// usually written.
fn one_or_many(mut items: Vec<Prop>) -> Prop {
    if items.len() == 1 {
        items.remove(0)
    } else {
        Prop::List(items)
    }
}

/// A role assumable by one AWS service.
#[derive(Debug, Clone)]
pub struct Role {
    id: LogicalId,
}

impl Role {
    pub fn for_service(
        stack: &mut Stack,
        path: &[&str],
        service: &str,
        managed_policies: &[&str],
    ) -> Result<Self> {
        let mut props = Prop::object([(
            "AssumeRolePolicyDocument",
            Prop::object([
                (
                    "Statement",
                    Prop::List(vec![Prop::object([
                        ("Action", "sts:AssumeRole".into()),
                        ("Effect", "Allow".into()),
                        ("Principal", Prop::object([("Service", service.into())])),
                    ])]),
                ),
                ("Version", POLICY_VERSION.into()),
            ]),
        )]);
        if !managed_policies.is_empty()
            && let Some(map) = props.as_map_mut()
        {
            map.insert(
                "ManagedPolicyArns".into(),
                Prop::List(
                    managed_policies
                        .iter()
                        .map(|p| managed_policy_arn(p).into())
                        .collect(),
                ),
            );
        }

        let id = stack.add_resource(path, "AWS::IAM::Role", props)?;
        Ok(Self { id })
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.id
    }

    pub fn arn(&self) -> Token {
        Token::get_att(&self.id, "Arn")
    }

    /// Attaches an inline policy to the role.
    pub fn attach_policy(
        &self,
        stack: &mut Stack,
        path: &[&str],
        statements: &[PolicyStatement],
    ) -> Result<LogicalId> {
        let policy = stack.add_resource(
            path,
            "AWS::IAM::Policy",
            Prop::object([
                (
                    "PolicyDocument",
                    Prop::object([
                        (
                            "Statement",
                            Prop::List(statements.iter().map(PolicyStatement::to_prop).collect()),
                        ),
                        ("Version", POLICY_VERSION.into()),
                    ]),
                ),
                ("Roles", Prop::List(vec![Token::reference(&self.id).into()])),
            ]),
        )?;
        if let Some(map) = stack
            .expect_resource_mut(&policy)?
            .properties_mut()
            .as_map_mut()
        {
            map.insert("PolicyName".into(), policy.to_string().into());
        }
        Ok(policy)
    }
}
