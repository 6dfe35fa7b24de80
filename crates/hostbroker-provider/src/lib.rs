//! The four AWS provisioning-API handlers (`RunInstances`/`EC2Fleet`/
//! `SpotFleet`/`ASG`), the shared release-path grouping algorithm, and the
//! [`strategy::ProviderStrategy`] that routes a [`hostbroker_domain::ProviderOperation`]
//! to the right one.

pub mod asg;
pub mod describe;
pub mod ec2_fleet;
pub mod error;
pub mod handler;
pub mod instance_adapter;
pub mod launch_template;
pub mod registry;
pub mod release;
pub mod resilient;
pub mod run_instances;
pub mod spot_fleet;
pub mod strategy;

pub use asg::AsgHandler;
pub use ec2_fleet::Ec2FleetHandler;
pub use error::ProviderError;
pub use handler::{AcquireOutcome, MachineObservation, ProviderHandler, ReleaseGroupResult, ReleaseOutcome};
pub use launch_template::{LaunchTemplateManager, ResolvedLaunchTemplate};
pub use registry::ProviderHandlerRegistry;
pub use run_instances::RunInstancesHandler;
pub use spot_fleet::SpotFleetHandler;
pub use strategy::ProviderStrategy;
