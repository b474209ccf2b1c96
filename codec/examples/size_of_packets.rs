// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::mem::size_of;

use mqtt_codec::{
    BinaryData, ByteArray, ConnectAckPacket, ConnectPacket, DisconnectPacket, PacketId,
    PingRequestPacket, PingResponsePacket, PubTopic, PublishAckPacket, PublishCompletePacket,
    PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS, StringData,
    SubscribeAckPacket, SubscribePacket, U16Data, UnsubscribeAckPacket, UnsubscribePacket,
    VarInt,
};

fn main() {
    println!("BinaryData: {}", size_of::<BinaryData>());
    println!("ByteArray: {}", size_of::<ByteArray>());
    println!("PacketId: {}", size_of::<PacketId>());
    println!("PubTopic: {}", size_of::<PubTopic>());
    println!("QoS: {}", size_of::<QoS>());
    println!("StringData: {}", size_of::<StringData>());
    println!("U16Data: {}", size_of::<U16Data>());
    println!("VarInt: {}", size_of::<VarInt>());

    println!("ConnectPacket: {}", size_of::<ConnectPacket>());
    println!("ConnectAckPacket: {}", size_of::<ConnectAckPacket>());
    println!("PublishPacket: {}", size_of::<PublishPacket>());
    println!("PublishAckPacket: {}", size_of::<PublishAckPacket>());
    println!("PublishReceivedPacket: {}", size_of::<PublishReceivedPacket>());
    println!("PublishReleasePacket: {}", size_of::<PublishReleasePacket>());
    println!("PublishCompletePacket: {}", size_of::<PublishCompletePacket>());
    println!("SubscribePacket: {}", size_of::<SubscribePacket>());
    println!("SubscribeAckPacket: {}", size_of::<SubscribeAckPacket>());
    println!("UnsubscribePacket: {}", size_of::<UnsubscribePacket>());
    println!("UnsubscribeAckPacket: {}", size_of::<UnsubscribeAckPacket>());
    println!("PingRequestPacket: {}", size_of::<PingRequestPacket>());
    println!("PingResponsePacket: {}", size_of::<PingResponsePacket>());
    println!("DisconnectPacket: {}", size_of::<DisconnectPacket>());
}
