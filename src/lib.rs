pub mod channel;
pub mod config;
pub mod proto;
pub mod service;

pub use channel::{ChannelError, ChannelHandle};
pub use config::ClientConfig;
pub use service::PersonServiceClient;

pub use rpc_calls::{
    BidiCall, BidiCompletion, BidiReceiver, BidiSender, CallCanceller, CallError, CallState,
    ClientStreamCall, Deadline, ServerStreamCall,
};
