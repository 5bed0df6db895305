mod handlers;
mod readings;
mod types;

pub use handlers::{get_station, latest_readings, list_station_sensors, list_stations};
pub use readings::sensor_readings;
pub use types::{ReadingResponse, ReadingsQuery, ReadingsResponse, SensorResponse, StationResponse};
