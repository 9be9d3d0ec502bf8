pub mod crypt;
pub mod packet;

pub use crypt::SessionCipher;
pub use packet::{decode_header, encode_frame, split_stream, Frame, PacketReader, ProtocolError};
