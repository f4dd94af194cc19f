//! Network boundary: VPC, subnets and security groups.

use std::str::FromStr;

use ipnet::Ipv4Net;

use crate::error::{ConstructError, Result};
use crate::prop::Prop;
use crate::stack::Stack;
use crate::token::{LogicalId, Token};

/// Source range for a rule that admits every IPv4 address.
pub const ANY_IPV4: &str = "0.0.0.0/0";

#[derive(Debug, Clone)]
pub struct VpcProps {
    /// Address space of the VPC.
    pub cidr: String,
    /// Availability zones to spread subnets over.
    pub max_azs: usize,
    /// NAT gateways; defaults to one per AZ. Zero leaves private subnets
    /// without outbound routes.
    pub nat_gateways: Option<usize>,
}

impl Default for VpcProps {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            max_azs: 2,
            nat_gateways: None,
        }
    }
}

/// Subnet tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetKind {
    Public,
    Private,
}

impl SubnetKind {
    fn label(self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Private => "Private",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subnet {
    pub kind: SubnetKind,
    pub subnet: LogicalId,
    pub route_table: LogicalId,
    /// Route to `0.0.0.0/0`, if the subnet has one.
    pub default_route: Option<LogicalId>,
    pub cidr: Ipv4Net,
    pub availability_zone: Token,
}

impl Subnet {
    pub fn subnet_id(&self) -> Token {
        Token::reference(&self.subnet)
    }
}

/// A VPC with one public and one private subnet per availability zone.
#[derive(Debug, Clone)]
pub struct Vpc {
    id: LogicalId,
    path: String,
    cidr: Ipv4Net,
    public_subnets: Vec<Subnet>,
    private_subnets: Vec<Subnet>,
}

impl Vpc {
    pub fn new(stack: &mut Stack, id: &str, props: VpcProps) -> Result<Self> {
        let cidr = Ipv4Net::from_str(&props.cidr).map_err(|e| {
            ConstructError::invalid("VPC cidr", format!("'{}': {e}", props.cidr))
        })?;
        if cidr != cidr.trunc() {
            return Err(ConstructError::invalid(
                "VPC cidr",
                format!("'{cidr}' has host bits set; use {}", cidr.trunc()),
            ));
        }
        if !(16..=28).contains(&cidr.prefix_len()) {
            return Err(ConstructError::invalid(
                "VPC cidr",
                format!("netmask /{} must be between /16 and /28", cidr.prefix_len()),
            ));
        }
        if !(1..=6).contains(&props.max_azs) {
            return Err(ConstructError::invalid(
                "max_azs",
                format!("{} must be between 1 and 6", props.max_azs),
            ));
        }
        let nat_count = props.nat_gateways.unwrap_or(props.max_azs);
        if nat_count > props.max_azs {
            return Err(ConstructError::invalid(
                "nat_gateways",
                format!("{nat_count} exceeds the {} availability zones", props.max_azs),
            ));
        }

        let ranges = split_cidr(cidr, props.max_azs * 2)?;

        let vpc = stack.add_resource(
            &[id, "Resource"],
            "AWS::EC2::VPC",
            Prop::object([
                ("CidrBlock", Prop::from(cidr.to_string())),
                ("EnableDnsHostnames", true.into()),
                ("EnableDnsSupport", true.into()),
                ("InstanceTenancy", "default".into()),
                ("Tags", name_tags(&format!("{}/{id}", stack.name()))),
            ]),
        )?;

        let igw = stack.add_resource(
            &[id, "IGW"],
            "AWS::EC2::InternetGateway",
            Prop::object([("Tags", name_tags(&format!("{}/{id}", stack.name())))]),
        )?;
        let attachment = stack.add_resource(
            &[id, "VPCGW"],
            "AWS::EC2::VPCGatewayAttachment",
            Prop::object([
                ("InternetGatewayId", Token::reference(&igw).into()),
                ("VpcId", Token::reference(&vpc).into()),
            ]),
        )?;

        let mut out = Self {
            id: vpc,
            path: id.to_string(),
            cidr,
            public_subnets: Vec::with_capacity(props.max_azs),
            private_subnets: Vec::with_capacity(props.max_azs),
        };

        let mut nat_gateways = Vec::with_capacity(nat_count);
        for az in 0..props.max_azs {
            let subnet = out.add_subnet(stack, SubnetKind::Public, az, ranges[az])?;
            let route = stack.add_resource(
                &[id, &format!("PublicSubnet{}", az + 1), "DefaultRoute"],
                "AWS::EC2::Route",
                Prop::object([
                    ("DestinationCidrBlock", ANY_IPV4.into()),
                    ("GatewayId", Token::reference(&igw).into()),
                    ("RouteTableId", Token::reference(&subnet.route_table).into()),
                ]),
            )?;
            stack.add_dependency(&route, &attachment)?;

            if az < nat_count {
                let scope = format!("PublicSubnet{}", az + 1);
                let eip = stack.add_resource(
                    &[id, &scope, "EIP"],
                    "AWS::EC2::EIP",
                    Prop::object([
                        ("Domain", "vpc".into()),
                        ("Tags", name_tags(&format!("{}/{id}/{scope}", stack.name()))),
                    ]),
                )?;
                let nat = stack.add_resource(
                    &[id, &scope, "NATGateway"],
                    "AWS::EC2::NatGateway",
                    Prop::object([
                        ("AllocationId", Token::get_att(&eip, "AllocationId").into()),
                        ("SubnetId", subnet.subnet_id().into()),
                        ("Tags", name_tags(&format!("{}/{id}/{scope}", stack.name()))),
                    ]),
                )?;
                stack.add_dependency(&nat, &route)?;
                nat_gateways.push(nat);
            }

            let mut subnet = subnet;
            subnet.default_route = Some(route);
            out.public_subnets.push(subnet);
        }

        for az in 0..props.max_azs {
            let mut subnet =
                out.add_subnet(stack, SubnetKind::Private, az, ranges[props.max_azs + az])?;
            if !nat_gateways.is_empty() {
                let nat = &nat_gateways[az % nat_gateways.len()];
                let route = stack.add_resource(
                    &[id, &format!("PrivateSubnet{}", az + 1), "DefaultRoute"],
                    "AWS::EC2::Route",
                    Prop::object([
                        ("DestinationCidrBlock", ANY_IPV4.into()),
                        ("NatGatewayId", Token::reference(nat).into()),
                        ("RouteTableId", Token::reference(&subnet.route_table).into()),
                    ]),
                )?;
                subnet.default_route = Some(route);
            }
            out.private_subnets.push(subnet);
        }

        tracing::info!(
            vpc = %out.id,
            cidr = %out.cidr,
            azs = props.max_azs,
            nat_gateways = nat_count,
            "Declared VPC",
        );
        Ok(out)
    }

    fn add_subnet(
        &self,
        stack: &mut Stack,
        kind: SubnetKind,
        az: usize,
        cidr: Ipv4Net,
    ) -> Result<Subnet> {
        let scope = format!("{}Subnet{}", kind.label(), az + 1);
        let tag_path = format!("{}/{}/{scope}", stack.name(), self.path);
        let availability_zone = Token::select(az, Token::GetAzs);

        let subnet = stack.add_resource(
            &[&self.path, &scope, "Subnet"],
            "AWS::EC2::Subnet",
            Prop::object([
                ("AvailabilityZone", availability_zone.clone().into()),
                ("CidrBlock", cidr.to_string().into()),
                ("MapPublicIpOnLaunch", (kind == SubnetKind::Public).into()),
                ("VpcId", self.vpc_id().into()),
                ("Tags", name_tags(&tag_path)),
            ]),
        )?;
        let route_table = stack.add_resource(
            &[&self.path, &scope, "RouteTable"],
            "AWS::EC2::RouteTable",
            Prop::object([
                ("VpcId", self.vpc_id().into()),
                ("Tags", name_tags(&tag_path)),
            ]),
        )?;
        stack.add_resource(
            &[&self.path, &scope, "RouteTableAssociation"],
            "AWS::EC2::SubnetRouteTableAssociation",
            Prop::object([
                ("RouteTableId", Token::reference(&route_table).into()),
                ("SubnetId", Token::reference(&subnet).into()),
            ]),
        )?;

        Ok(Subnet {
            kind,
            subnet,
            route_table,
            default_route: None,
            cidr,
            availability_zone,
        })
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.id
    }

    pub fn vpc_id(&self) -> Token {
        Token::reference(&self.id)
    }

    /// The VPC's address range, resolved at deploy time.
    pub fn cidr_block(&self) -> Token {
        Token::get_att(&self.id, "CidrBlock")
    }

    /// The address range as declared.
    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    pub fn public_subnets(&self) -> &[Subnet] {
        &self.public_subnets
    }

    pub fn private_subnets(&self) -> &[Subnet] {
        &self.private_subnets
    }

    pub fn private_subnet_ids(&self) -> Vec<Token> {
        self.private_subnets.iter().map(Subnet::subnet_id).collect()
    }

    /// Default routes of the private subnets; resources placed in them must
    /// wait for outbound connectivity.
    pub fn private_default_routes(&self) -> impl Iterator<Item = &LogicalId> {
        self.private_subnets
            .iter()
            .filter_map(|s| s.default_route.as_ref())
    }
}

/// Splits `cidr` into at least `count` equal blocks, in address order.
fn split_cidr(cidr: Ipv4Net, count: usize) -> Result<Vec<Ipv4Net>> {
    let extra_bits = count.next_power_of_two().trailing_zeros() as u8;
    let prefix = cidr.prefix_len() + extra_bits;
    let subnets: Vec<Ipv4Net> = cidr
        .subnets(prefix)
        .map_err(|_| {
            ConstructError::invalid(
                "VPC cidr",
                format!("{cidr} is too small for {count} subnets"),
            )
        })?
        .collect();
    if prefix > 28 {
        return Err(ConstructError::invalid(
            "VPC cidr",
            format!("{cidr} is too small for {count} subnets"),
        ));
    }
    Ok(subnets)
}

fn name_tags(name: &str) -> Prop {
    Prop::List(vec![Prop::object([
        ("Key", "Name".into()),
        ("Value", name.into()),
    ])])
}

/// Where traffic may come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    /// `0.0.0.0/0`.
    AnyIpv4,
    /// A CIDR range, possibly deferred (such as a VPC's `CidrBlock`).
    Ipv4(Token),
}

impl Peer {
    pub fn any_ipv4() -> Self {
        Self::AnyIpv4
    }

    pub fn ipv4(cidr: impl Into<Token>) -> Self {
        Self::Ipv4(cidr.into())
    }

    /// Whether the peer admits the whole internet.
    pub fn is_world_open(&self) -> bool {
        match self {
            Self::AnyIpv4 => true,
            Self::Ipv4(t) => t.as_literal() == Some(ANY_IPV4),
        }
    }

    fn cidr(&self) -> Prop {
        match self {
            Self::AnyIpv4 => ANY_IPV4.into(),
            Self::Ipv4(t) => t.clone().into(),
        }
    }
}

/// A single TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port(u16);

impl Port {
    pub fn tcp(port: u16) -> Self {
        Self(port)
    }

    pub fn number(self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct SecurityGroup {
    id: LogicalId,
}

impl SecurityGroup {
    /// Declares a security group at `path`, allowing all outbound traffic.
    pub fn new(
        stack: &mut Stack,
        path: &[&str],
        vpc: &Vpc,
        description: Option<&str>,
    ) -> Result<Self> {
        let description = description.map_or_else(
            || format!("{}/{}", stack.name(), path.join("/")),
            str::to_string,
        );
        let id = stack.add_resource(
            &[path, &["Resource"][..]].concat(),
            "AWS::EC2::SecurityGroup",
            Prop::object([
                ("GroupDescription", description.into()),
                (
                    "SecurityGroupEgress",
                    Prop::List(vec![Prop::object([
                        ("CidrIp", ANY_IPV4.into()),
                        ("Description", "Allow all outbound traffic by default".into()),
                        ("IpProtocol", "-1".into()),
                    ])]),
                ),
                ("VpcId", vpc.vpc_id().into()),
            ]),
        )?;
        Ok(Self { id })
    }

    pub fn logical_id(&self) -> &LogicalId {
        &self.id
    }

    pub fn group_id(&self) -> Token {
        Token::get_att(&self.id, "GroupId")
    }

    /// Adds an inline ingress rule. A rule for a peer and port that are
    /// already admitted is a no-op, whatever its description.
    pub fn add_ingress_rule(
        &self,
        stack: &mut Stack,
        peer: &Peer,
        port: Port,
        description: &str,
    ) -> Result<()> {
        let rule = Prop::object([
            ("CidrIp", peer.cidr()),
            ("Description", description.into()),
            ("FromPort", port.number().into()),
            ("IpProtocol", "tcp".into()),
            ("ToPort", port.number().into()),
        ]);

        if peer.is_world_open() {
            tracing::warn!(
                security_group = %self.id,
                port = port.number(),
                "Ingress rule admits 0.0.0.0/0",
            );
        }

        let resource = stack.expect_resource_mut(&self.id)?;
        let Some(rules) = resource.properties_mut().entry_list("SecurityGroupIngress") else {
            return Err(ConstructError::invalid(
                "SecurityGroupIngress",
                "security group properties are not a map",
            ));
        };
        if rules.iter().any(|existing| same_permission(existing, &rule)) {
            tracing::debug!(security_group = %self.id, "Ingress rule already present");
            return Ok(());
        }
        rules.push(rule);
        Ok(())
    }
}

/// Two ingress rules grant the same permission when everything but their
/// description matches. EC2 rejects such duplicates within one group.
fn same_permission(a: &Prop, b: &Prop) -> bool {
    ["CidrIp", "IpProtocol", "FromPort", "ToPort"]
        .iter()
        .all(|key| a.get(key) == b.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackProps;
    use serde_json::json;

    fn stack() -> Stack {
        Stack::new("NetStack", StackProps::default()).unwrap()
    }

    #[test]
    fn default_vpc_layout() {
        let mut s = stack();
        let vpc = Vpc::new(&mut s, "Vpc", VpcProps::default()).unwrap();
        let t = s.synth().unwrap();

        assert_eq!(t.resource_count("AWS::EC2::VPC"), 1);
        assert_eq!(t.resource_count("AWS::EC2::Subnet"), 4);
        assert_eq!(t.resource_count("AWS::EC2::NatGateway"), 2);
        assert_eq!(t.resource_count("AWS::EC2::Route"), 4);

        let cidrs: Vec<String> = vpc
            .public_subnets()
            .iter()
            .chain(vpc.private_subnets())
            .map(|s| s.cidr.to_string())
            .collect();
        assert_eq!(
            cidrs,
            ["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );
        assert_eq!(vpc.private_default_routes().count(), 2);
        assert_eq!(
            vpc.cidr_block().to_json(),
            json!({ "Fn::GetAtt": [vpc.logical_id().as_str(), "CidrBlock"] })
        );
    }

    #[test]
    fn no_nat_gateways_leaves_private_subnets_isolated() {
        let mut s = stack();
        let vpc = Vpc::new(
            &mut s,
            "Vpc",
            VpcProps {
                nat_gateways: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(vpc.private_default_routes().count(), 0);
        assert_eq!(s.resources_of_type("AWS::EC2::NatGateway").count(), 0);
    }

    #[test]
    fn invalid_vpc_props_rejected() {
        let mut s = stack();
        for props in [
            VpcProps { cidr: "not-a-cidr".into(), ..Default::default() },
            VpcProps { cidr: "10.0.0.0/8".into(), ..Default::default() },
            VpcProps { max_azs: 0, ..Default::default() },
            VpcProps { nat_gateways: Some(3), ..Default::default() },
            VpcProps { cidr: "10.0.0.0/28".into(), ..Default::default() },
            VpcProps { cidr: "10.0.3.7/16".into(), ..Default::default() },
        ] {
            assert!(matches!(
                Vpc::new(&mut s, "Vpc", props),
                Err(ConstructError::InvalidProperty { .. })
            ));
        }
    }

    #[test]
    fn ingress_rule_from_vpc_cidr() {
        let mut s = stack();
        let vpc = Vpc::new(&mut s, "Vpc", VpcProps::default()).unwrap();
        let sg = SecurityGroup::new(&mut s, &["Db", "SecurityGroup"], &vpc, None).unwrap();
        let peer = Peer::ipv4(vpc.cidr_block());
        assert!(!peer.is_world_open());

        sg.add_ingress_rule(&mut s, &peer, Port::tcp(8182), "from vpc").unwrap();
        sg.add_ingress_rule(&mut s, &peer, Port::tcp(8182), "from vpc").unwrap();

        let t = s.synth().unwrap();
        let res = t.resource(sg.logical_id().as_str()).unwrap();
        let rules = res["Properties"]["SecurityGroupIngress"].as_array().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0]["CidrIp"], vpc.cidr_block().to_json());
        assert_eq!(rules[0]["FromPort"], 8182);
        assert_eq!(
            res["Properties"]["GroupDescription"],
            "NetStack/Db/SecurityGroup"
        );
    }

    #[test]
    fn same_peer_and_port_with_new_description_is_not_duplicated() {
        let mut s = stack();
        let vpc = Vpc::new(&mut s, "Vpc", VpcProps::default()).unwrap();
        let sg = SecurityGroup::new(&mut s, &["Db", "SecurityGroup"], &vpc, None).unwrap();

        sg.add_ingress_rule(&mut s, &Peer::any_ipv4(), Port::tcp(8182), "a").unwrap();
        sg.add_ingress_rule(&mut s, &Peer::any_ipv4(), Port::tcp(8182), "b").unwrap();
        sg.add_ingress_rule(&mut s, &Peer::any_ipv4(), Port::tcp(8183), "c").unwrap();

        let t = s.synth().unwrap();
        let res = t.resource(sg.logical_id().as_str()).unwrap();
        let rules = res["Properties"]["SecurityGroupIngress"].as_array().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0]["Description"], "a");
        assert_eq!(rules[1]["FromPort"], 8183);
    }

    #[test]
    fn world_open_peer_detected() {
        assert!(Peer::any_ipv4().is_world_open());
        assert!(Peer::ipv4("0.0.0.0/0").is_world_open());
        assert!(!Peer::ipv4("10.0.0.0/16").is_world_open());
    }
}
