//! Generated gRPC types for the kiosk agent service.

pub mod kiosk {
    pub mod v1 {
        tonic::include_proto!("kiosk.v1");
    }
}
