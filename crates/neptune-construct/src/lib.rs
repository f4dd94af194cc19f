//! Neptune Construct: typed infrastructure declarations that synthesize to
//! CloudFormation.
//!
//! A [`Stack`] owns every declared resource. Constructs (VPC, Lambda
//! function, AppSync API, Neptune cluster) add resources to it and hand back
//! handles whose attributes are [`Token`]s, values that only exist after
//! deployment. Dependencies are inferred from the tokens a resource's
//! properties reference, so constructs may be declared in any order.
//!
//! Synthesis validates references, topologically orders the resources and
//! renders a deterministic [`Template`]; [`assembly::cloud_assembly`] wraps it
//! in the files a deployment tool expects.
//!
//! **No I/O beyond reading assets**: writing the assembly is up to the caller.

pub mod appsync;
pub mod assembly;
pub mod asset;
pub mod ec2;
pub mod error;
pub mod iam;
pub mod lambda;
pub mod neptune;
pub mod prop;
pub mod stack;
pub mod template;
pub mod token;

pub use error::{ConstructError, Result};
pub use prop::Prop;
pub use stack::{RemovalPolicy, Stack, StackProps};
pub use template::Template;
pub use token::{LogicalId, Pseudo, Token};
