//! Data cluster: Neptune graph database cluster and its endpoints.

use std::str::FromStr;

use crate::ec2::{Peer, Port, SecurityGroup, Vpc};
use crate::error::{ConstructError, Result};
use crate::prop::Prop;
use crate::stack::{RemovalPolicy, Stack};
use crate::token::{LogicalId, Token};

/// Port Neptune listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8182;
/// Upper bound on instances (one writer plus up to fifteen replicas).
pub const MAX_INSTANCES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceType {
    T3Medium,
    T4gMedium,
    #[default]
    R5Large,
    R5Xlarge,
    R6gLarge,
    R6gXlarge,
}

impl InstanceType {
    const ALL: [Self; 6] = [
        Self::T3Medium,
        Self::T4gMedium,
        Self::R5Large,
        Self::R5Xlarge,
        Self::R6gLarge,
        Self::R6gXlarge,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::T3Medium => "db.t3.medium",
            Self::T4gMedium => "db.t4g.medium",
            Self::R5Large => "db.r5.large",
            Self::R5Xlarge => "db.r5.xlarge",
            Self::R6gLarge => "db.r6g.large",
            Self::R6gXlarge => "db.r6g.xlarge",
        }
    }
}

impl FromStr for InstanceType {
    type Err = ConstructError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.strip_prefix("db.").unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().strip_prefix("db.") == Some(wanted))
            .ok_or_else(|| {
                let reason = format!("unsupported instance class '{s}'");
                ConstructError::invalid("instance type", reason)
            })
    }
}

impl std::fmt::Display for InstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A network endpoint whose address is known only after deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    hostname: Token,
    port: Token,
}

impl Endpoint {
    pub fn hostname(&self) -> &Token {
        &self.hostname
    }

    pub fn port(&self) -> &Token {
        &self.port
    }

    /// `host:port`.
    pub fn socket_address(&self) -> Token {
        Token::concat(vec![self.hostname.clone(), ":".into(), self.port.clone()])
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseClusterProps<'a> {
    pub vpc: &'a Vpc,
    pub instance_type: InstanceType,
    /// Total instances; the first is the writer, the rest serve reads.
    pub instances: usize,
    pub port: u16,
    pub removal_policy: RemovalPolicy,
    pub iam_authentication: bool,
    pub engine_version: Option<String>,
}

impl<'a> DatabaseClusterProps<'a> {
    pub fn new(vpc: &'a Vpc, instance_type: InstanceType) -> Self {
        Self {
            vpc,
            instance_type,
            instances: 1,
            port: DEFAULT_PORT,
            removal_policy: RemovalPolicy::Retain,
            iam_authentication: false,
            engine_version: None,
        }
    }
}

/// A declared Neptune cluster.
#[derive(Debug, Clone)]
pub struct DatabaseCluster {
    id: LogicalId,
    subnet_group: LogicalId,
    security_group: SecurityGroup,
    instances: Vec<LogicalId>,
    port: u16,
}

impl DatabaseCluster {
    pub fn new(stack: &mut Stack, id: &str, props: DatabaseClusterProps<'_>) -> Result<Self> {
        if !(1..=MAX_INSTANCES).contains(&props.instances) {
            return Err(ConstructError::invalid(
                "instances",
                format!("{} must be between 1 and {MAX_INSTANCES}", props.instances),
            ));
        }
        if props.port < 1150 {
            return Err(ConstructError::invalid(
                "port",
                format!("{} is below the 1150 minimum", props.port),
            ));
        }
        if props.vpc.private_subnets().is_empty() {
            return Err(ConstructError::invalid("vpc", "cluster needs private subnets"));
        }

        let subnet_group = stack.add_resource(
            &[id, "Subnets", "Default"],
            "AWS::Neptune::DBSubnetGroup",
            Prop::object([
                ("DBSubnetGroupDescription", format!("Subnets for {id} database").into()),
                ("SubnetIds", props.vpc.private_subnet_ids().into()),
            ]),
        )?;

        let security_group = SecurityGroup::new(
            stack,
            &[id, "SecurityGroup"],
            props.vpc,
            Some("Neptune security group"),
        )?;

        let mut cluster_props = Prop::object([
            ("DBSubnetGroupName", Token::reference(&subnet_group).into()),
            ("IamAuthEnabled", props.iam_authentication.into()),
            ("StorageEncrypted", true.into()),
            ("VpcSecurityGroupIds", Prop::List(vec![security_group.group_id().into()])),
        ]);
        if let Some(map) = cluster_props.as_map_mut() {
            if props.port != DEFAULT_PORT {
                map.insert("Port".into(), props.port.into());
            }
            if let Some(version) = &props.engine_version {
                map.insert("EngineVersion".into(), version.clone().into());
            }
        }
        let cluster =
            stack.add_resource(&[id, "Resource"], "AWS::Neptune::DBCluster", cluster_props)?;

        let mut instances = Vec::with_capacity(props.instances);
        for n in 1..=props.instances {
            let instance = stack.add_resource(
                &[id, &format!("Instance{n}")],
                "AWS::Neptune::DBInstance",
                Prop::object([
                    ("DBClusterIdentifier", Token::reference(&cluster).into()),
                    ("DBInstanceClass", props.instance_type.as_str().into()),
                ]),
            )?;
            stack.set_removal_policy(&instance, props.removal_policy)?;
            instances.push(instance);
        }
        stack.set_removal_policy(&cluster, props.removal_policy)?;
        stack.set_removal_policy(&subnet_group, props.removal_policy)?;

        tracing::info!(
            cluster = %cluster,
            instance_type = %props.instance_type,
            instances = props.instances,
            port = props.port,
            "Declared Neptune cluster",
        );

        Ok(Self {
            id: cluster,
            subnet_group,
            security_group,
            instances,
            port: props.port,
        })
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.id
    }

    pub fn subnet_group(&self) -> &LogicalId {
        &self.subnet_group
    }

    pub fn security_group(&self) -> &SecurityGroup {
        &self.security_group
    }

    pub fn instances(&self) -> &[LogicalId] {
        &self.instances
    }

    /// Writer endpoint.
    pub fn cluster_endpoint(&self) -> Endpoint {
        Endpoint {
            hostname: Token::get_att(&self.id, "Endpoint"),
            port: Token::get_att(&self.id, "Port"),
        }
    }

    /// Load-balanced reader endpoint.
    pub fn cluster_read_endpoint(&self) -> Endpoint {
        Endpoint {
            hostname: Token::get_att(&self.id, "ReadEndpoint"),
            port: Token::get_att(&self.id, "Port"),
        }
    }

    /// Admits `peer` on the cluster port.
    pub fn allow_default_port_from(
        &self,
        stack: &mut Stack,
        peer: &Peer,
        description: &str,
    ) -> Result<()> {
        self.security_group
            .add_ingress_rule(stack, peer, Port::tcp(self.port), description)
    }

    /// Admits every IPv4 address on the cluster port. This exposes the
    /// database to the internet and is kept only for the legacy topology.
    pub fn allow_default_port_from_any_ipv4(
        &self,
        stack: &mut Stack,
        description: &str,
    ) -> Result<()> {
        tracing::warn!(
            cluster = %self.id,
            port = self.port,
            "Opening database port to 0.0.0.0/0; this is a security regression",
        );
        self.allow_default_port_from(stack, &Peer::any_ipv4(), description)
    }
}
