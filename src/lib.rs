pub mod acquisition;
pub mod axis_move;
pub mod config;
pub mod datafile;
pub mod destination;
pub mod device;
pub mod error;
pub mod geometry;
pub mod job;
pub mod logger;
pub mod meta;
pub mod motion;
pub mod reposition;
pub mod scan;
pub mod session;
pub mod timing;
pub mod traversal;
pub mod types;
pub mod utils;

pub use acquisition::{Acquisition, CellRecord};
pub use axis_move::{parse_distance, AxisMotion, AxisMove};
pub use config::{load_config, AppConfig, Backend, DeviceConfig, MetaTiming, ScanOptions};
pub use datafile::DataHeader;
pub use destination::{default_destination, prepare_destination, DestinationStatus};
pub use device::{AcquisitionDevice, Burst, LabJackDevice, SimulatedDevice};
pub use error::ScanError;
pub use geometry::ScanGeometry;
pub use job::Job;
pub use logger::Logger;
pub use meta::MetaValue;
pub use motion::MotionDriver;
pub use scan::{estimate, RasterScan, ScanEstimate, ScanSummary};
pub use session::Session;
pub use timing::ScanTiming;
pub use types::{Axis, Cell, Direction};
