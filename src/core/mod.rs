pub mod flows;
pub mod gateway;
pub mod logging;
pub mod wizard;
