//! Response stream consumers
//!
//! A consumer folds the decoded packets of one response into a result. It is a
//! plain state machine: the session reads a packet, decodes it and calls
//! [`Consumer::feed`], which answers [`Step::Continue`] until the response is
//! complete or malformed. Consumers never perform I/O themselves.
//!
//! A consumer that returned [`Step::Done`] or [`Step::Fail`] is spent; any
//! further packet fails. Whatever it accumulated before failing is dropped.

use crate::decoder::Value;
use crate::packet::PacketId;
use crate::records::{DeviceCapabilities, ProductInfo};
use crate::types::GarminError;
use std::mem;

/// Outcome of feeding one packet to a consumer
#[derive(Debug)]
pub enum Step<T> {
    Continue,
    Done(T),
    Fail(GarminError),
}

/// Step function over the packets of a single response
pub trait Consumer {
    type Output;

    /// Whether the next packet may carry this id
    ///
    /// The session decodes only accepted packets. Anything else is fed as
    /// [`Value::Unknown`] so the consumer can report it.
    fn accepts(&self, _packet_id: u16) -> bool {
        true
    }

    fn feed(&mut self, packet_id: u16, value: Value) -> Step<Self::Output>;
}

fn packet_name(packet_id: u16) -> String {
    match PacketId::from_u16(packet_id) {
        Some(id) => id.name().to_string(),
        None => format!("{:04X}", packet_id),
    }
}

fn unexpected<T>(actual_id: u16, context: String) -> Step<T> {
    Step::Fail(GarminError::UnexpectedPacket { actual_id, context })
}

fn finished<T>() -> Step<T> {
    Step::Fail(GarminError::Protocol(
        "Consumer already finished".to_string(),
    ))
}

fn record_count<T>(value: Value) -> Result<usize, Step<T>> {
    match value {
        Value::UShort(count) => Ok(count as usize),
        other => Err(Step::Fail(GarminError::Protocol(format!(
            "RECORDS packet carried {} instead of a count",
            other.kind()
        )))),
    }
}

/// Expects exactly one packet with a given id
#[derive(Debug)]
pub struct SingleRecord {
    expected: u16,
    finished: bool,
}

impl SingleRecord {
    pub fn new(expected: u16) -> Self {
        Self {
            expected,
            finished: false,
        }
    }
}

impl Consumer for SingleRecord {
    type Output = Value;

    fn accepts(&self, packet_id: u16) -> bool {
        !self.finished && packet_id == self.expected
    }

    fn feed(&mut self, packet_id: u16, value: Value) -> Step<Value> {
        if self.finished {
            return finished();
        }
        self.finished = true;

        if packet_id != self.expected {
            return unexpected(packet_id, format!("expected {}", packet_name(self.expected)));
        }
        Step::Done(value)
    }
}

#[derive(Debug)]
enum ListState {
    AwaitingCount,
    Receiving { count: usize, records: Vec<Value> },
    AwaitingComplete { records: Vec<Value> },
    Finished,
}

/// `RECORDS(n)`, then `n` records of one id, then `TRANSFER_COMPLETE`
#[derive(Debug)]
pub struct RecordList {
    expected: u16,
    state: ListState,
}

impl RecordList {
    pub fn new(expected: u16) -> Self {
        Self {
            expected,
            state: ListState::AwaitingCount,
        }
    }
}

impl Consumer for RecordList {
    type Output = Vec<Value>;

    fn accepts(&self, packet_id: u16) -> bool {
        match self.state {
            ListState::AwaitingCount => packet_id == PacketId::Records.code(),
            ListState::Receiving { .. } => packet_id == self.expected,
            ListState::AwaitingComplete { .. } => packet_id == PacketId::TransferComplete.code(),
            ListState::Finished => false,
        }
    }

    fn feed(&mut self, packet_id: u16, value: Value) -> Step<Vec<Value>> {
        // Any early return leaves the consumer finished
        let state = mem::replace(&mut self.state, ListState::Finished);

        match state {
            ListState::AwaitingCount => {
                if packet_id != PacketId::Records.code() {
                    return unexpected(packet_id, "expected RECORDS".to_string());
                }
                let count = match record_count(value) {
                    Ok(count) => count,
                    Err(step) => return step,
                };
                self.state = if count == 0 {
                    ListState::AwaitingComplete {
                        records: Vec::new(),
                    }
                } else {
                    ListState::Receiving {
                        count,
                        records: Vec::with_capacity(count),
                    }
                };
                Step::Continue
            }
            ListState::Receiving { count, mut records } => {
                if packet_id != self.expected {
                    return unexpected(
                        packet_id,
                        format!(
                            "expected {} at record {} of {}",
                            packet_name(self.expected),
                            records.len() + 1,
                            count
                        ),
                    );
                }
                records.push(value);
                self.state = if records.len() == count {
                    ListState::AwaitingComplete { records }
                } else {
                    ListState::Receiving { count, records }
                };
                Step::Continue
            }
            ListState::AwaitingComplete { records } => {
                if packet_id != PacketId::TransferComplete.code() {
                    return unexpected(
                        packet_id,
                        format!("expected TRANSFER_COMPLETE after {} records", records.len()),
                    );
                }
                Step::Done(records)
            }
            ListState::Finished => finished(),
        }
    }
}

/// A header record and the data records that followed it
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub header: Option<Value>,
    pub data: Vec<Value>,
}

impl Group {
    fn empty() -> Self {
        Self {
            header: None,
            data: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.header.is_none() && self.data.is_empty()
    }
}

#[derive(Debug)]
enum GroupState {
    AwaitingCount,
    Receiving {
        remaining: usize,
        groups: Vec<Group>,
        current: Group,
    },
    Finished,
}

/// `RECORDS(n)`, then `n` header or data records, then `TRANSFER_COMPLETE`
///
/// Each header opens a new group; data records append to the open group.
#[derive(Debug)]
pub struct GroupedList {
    header_id: u16,
    data_id: u16,
    state: GroupState,
}

impl GroupedList {
    pub fn new(header_id: u16, data_id: u16) -> Self {
        Self {
            header_id,
            data_id,
            state: GroupState::AwaitingCount,
        }
    }
}

impl Consumer for GroupedList {
    type Output = Vec<Group>;

    fn accepts(&self, packet_id: u16) -> bool {
        match self.state {
            GroupState::AwaitingCount => packet_id == PacketId::Records.code(),
            GroupState::Receiving { remaining: 0, .. } => {
                packet_id == PacketId::TransferComplete.code()
            }
            GroupState::Receiving { .. } => packet_id == self.header_id || packet_id == self.data_id,
            GroupState::Finished => false,
        }
    }

    fn feed(&mut self, packet_id: u16, value: Value) -> Step<Vec<Group>> {
        let state = mem::replace(&mut self.state, GroupState::Finished);

        match state {
            GroupState::AwaitingCount => {
                if packet_id != PacketId::Records.code() {
                    return unexpected(packet_id, "expected RECORDS".to_string());
                }
                let remaining = match record_count(value) {
                    Ok(count) => count,
                    Err(step) => return step,
                };
                self.state = GroupState::Receiving {
                    remaining,
                    groups: Vec::new(),
                    current: Group::empty(),
                };
                Step::Continue
            }
            GroupState::Receiving {
                remaining: 0,
                mut groups,
                current,
            } => {
                if packet_id != PacketId::TransferComplete.code() {
                    return unexpected(packet_id, "expected TRANSFER_COMPLETE".to_string());
                }
                if !current.is_empty() {
                    groups.push(current);
                }
                Step::Done(groups)
            }
            GroupState::Receiving {
                remaining,
                mut groups,
                mut current,
            } => {
                if packet_id == self.header_id {
                    // Data that arrived before any header is dropped
                    if current.header.is_some() {
                        groups.push(current);
                    }
                    current = Group {
                        header: Some(value),
                        data: Vec::new(),
                    };
                } else if packet_id == self.data_id {
                    current.data.push(value);
                } else {
                    return unexpected(
                        packet_id,
                        format!(
                            "expected {} or {}",
                            packet_name(self.header_id),
                            packet_name(self.data_id)
                        ),
                    );
                }
                self.state = GroupState::Receiving {
                    remaining: remaining - 1,
                    groups,
                    current,
                };
                Step::Continue
            }
            GroupState::Finished => finished(),
        }
    }
}

#[derive(Debug)]
enum NegotiationState {
    AwaitingProduct,
    Collecting {
        product: ProductInfo,
        extended: Vec<String>,
    },
    Finished,
}

/// `PRODUCT_DATA`, any number of `EXTENDED_PRODUCT_DATA`, then `PROTOCOL_ARRAY`
#[derive(Debug)]
pub struct CapabilityNegotiation {
    state: NegotiationState,
}

impl CapabilityNegotiation {
    pub fn new() -> Self {
        Self {
            state: NegotiationState::AwaitingProduct,
        }
    }
}

impl Default for CapabilityNegotiation {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer for CapabilityNegotiation {
    type Output = DeviceCapabilities;

    fn accepts(&self, packet_id: u16) -> bool {
        match self.state {
            NegotiationState::AwaitingProduct => packet_id == PacketId::ProductData.code(),
            NegotiationState::Collecting { .. } => {
                packet_id == PacketId::ExtendedProductData.code()
                    || packet_id == PacketId::ProtocolArray.code()
            }
            NegotiationState::Finished => false,
        }
    }

    fn feed(&mut self, packet_id: u16, value: Value) -> Step<DeviceCapabilities> {
        let state = mem::replace(&mut self.state, NegotiationState::Finished);

        match (state, value) {
            (NegotiationState::AwaitingProduct, Value::ProductData(product))
                if packet_id == PacketId::ProductData.code() =>
            {
                self.state = NegotiationState::Collecting {
                    product,
                    extended: Vec::new(),
                };
                Step::Continue
            }
            (NegotiationState::AwaitingProduct, _) => {
                unexpected(packet_id, "expected PRODUCT_DATA".to_string())
            }
            (
                NegotiationState::Collecting {
                    product,
                    mut extended,
                },
                Value::ExtendedProductData(strings),
            ) if packet_id == PacketId::ExtendedProductData.code() => {
                extended.extend(strings);
                self.state = NegotiationState::Collecting { product, extended };
                Step::Continue
            }
            (
                NegotiationState::Collecting { product, extended },
                Value::ProtocolArray(capabilities),
            ) if packet_id == PacketId::ProtocolArray.code() => Step::Done(DeviceCapabilities {
                product,
                extended_product_data: extended,
                capabilities,
            }),
            (NegotiationState::Collecting { .. }, _) => unexpected(
                packet_id,
                "expected EXTENDED_PRODUCT_DATA or PROTOCOL_ARRAY".to_string(),
            ),
            (NegotiationState::Finished, _) => finished(),
        }
    }
}

/// Run a consumer over an in-memory packet sequence
///
/// Stops at the first `Done` or `Fail`; running out of packets is a protocol
/// error.
pub fn drain<C, I>(consumer: &mut C, packets: I) -> crate::types::Result<C::Output>
where
    C: Consumer,
    I: IntoIterator<Item = (u16, Value)>,
{
    for (packet_id, value) in packets {
        match consumer.feed(packet_id, value) {
            Step::Continue => continue,
            Step::Done(output) => return Ok(output),
            Step::Fail(err) => return Err(err),
        }
    }
    Err(GarminError::Protocol(
        "Response ended before the consumer completed".to_string(),
    ))
}
