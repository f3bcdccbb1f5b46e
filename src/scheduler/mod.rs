//! Test orchestration for both node roles
//!
//! The master walks its test definitions tier by tier with a
//! [`TestScheduler`], running each through a [`TestRunner`]. The slave serves
//! whatever the master asks for with a [`Responder`].

mod master;
mod slave;

pub use self::master::{
    RadioTestRunner, ScheduleReport, StopReason, TestOutcome, TestRunner, TestScheduler,
};
pub use self::slave::{Responder, ResponderStats, Served};
