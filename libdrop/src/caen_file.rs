use byteorder::{BigEndian, ByteOrder, LittleEndian};
use fxhash::FxHashMap;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use super::config::{Config, DaqSoftware};
use super::constants::*;
use super::error::CaenFileError;
use super::trigger::{BoardTrace, Trigger, TriggerSource};

/// The four header words of a V1730 record
#[derive(Debug, Clone, Copy)]
struct RecordHeader {
    words: [u32; HEADER_WORDS],
}

impl RecordHeader {
    fn has_marker(&self) -> bool {
        self.words[0] & HEADER_MARKER_MASK == HEADER_MARKER
    }

    fn event_size_words(&self) -> u32 {
        self.words[0] & EVENT_SIZE_MASK
    }

    fn board_id(&self) -> u8 {
        ((self.words[1] & BOARD_ID_MASK) >> BOARD_ID_SHIFT) as u8
    }

    fn is_zle(&self) -> bool {
        self.words[1] & ZLE_FLAG != 0
    }

    fn channel_mask(&self) -> u16 {
        ((self.words[1] & CHANNEL_MASK_LOW)
            + ((self.words[2] & CHANNEL_MASK_HIGH) >> CHANNEL_MASK_HIGH_SHIFT)) as u16
    }

    fn pattern(&self) -> u32 {
        (self.words[1] >> PATTERN_SHIFT) & PATTERN_MASK
    }

    fn event_counter(&self) -> u32 {
        self.words[2] & EVENT_COUNTER_MASK
    }

    fn time_tag(&self) -> u32 {
        self.words[3]
    }
}

/// Reader for CAEN V1730 binary data, one board record at a time.
///
/// Records from all boards are interleaved in the file in acquisition order. The reader
/// does not try to group them; that is the BoardSynchronizer's job. It does undo the
/// per-board trigger time tag rollover, and it can skip over garbage between records.
#[derive(Debug)]
pub struct CaenReader<R: Read + Seek> {
    reader: R,
    software: DaqSoftware,
    extended_time_tag: bool,
    position: u64,
    total_bytes: u64,
    last_time_tag: FxHashMap<u8, u64>,
    rollovers: FxHashMap<u8, u64>,
    last_event_counter: Option<u32>,
    trigger_counter: u64,
}

/// The reader used for files on disk
pub type CaenFile = CaenReader<BufReader<File>>;

impl CaenFile {
    /// Open a binary file using the word order and time tag settings of the config
    pub fn open(path: &Path, config: &Config) -> Result<Self, CaenFileError> {
        if !path.exists() {
            return Err(CaenFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len();
        Ok(CaenReader::new(
            BufReader::new(file),
            total_bytes,
            config.daq_software,
            config.extended_time_tag,
        ))
    }
}

impl<R: Read + Seek> CaenReader<R> {
    pub fn new(reader: R, total_bytes: u64, software: DaqSoftware, extended_time_tag: bool) -> Self {
        Self {
            reader,
            software,
            extended_time_tag,
            position: 0,
            total_bytes,
            last_time_tag: FxHashMap::default(),
            rollovers: FxHashMap::default(),
            last_event_counter: None,
            trigger_counter: 0,
        }
    }

    /// Number of well formed records read so far
    pub fn trigger_counter(&self) -> u64 {
        self.trigger_counter
    }

    fn decode_u32(&self, bytes: &[u8]) -> u32 {
        match self.software {
            DaqSoftware::ToolDaq => LittleEndian::read_u32(bytes),
            DaqSoftware::LabView => BigEndian::read_u32(bytes),
        }
    }

    fn decode_u16(&self, bytes: &[u8]) -> u16 {
        match self.software {
            DaqSoftware::ToolDaq => LittleEndian::read_u16(bytes),
            DaqSoftware::LabView => BigEndian::read_u16(bytes),
        }
    }

    fn decode_header(&self, bytes: &[u8]) -> RecordHeader {
        let mut words = [0u32; HEADER_WORDS];
        for (idx, word) in words.iter_mut().enumerate() {
            *word = self.decode_u32(&bytes[idx * 4..idx * 4 + 4]);
        }
        RecordHeader { words }
    }

    /// Read exactly buf.len() bytes. Returns false on a clean end of file.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<bool, CaenFileError> {
        match self.reader.read_exact(buf) {
            Ok(()) => {
                self.position += buf.len() as u64;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(CaenFileError::IOError(e)),
        }
    }

    /// A header is believable if it carries the marker and its counter is close to the
    /// last good one
    fn is_sane(&self, header: &RecordHeader) -> bool {
        if !header.has_marker() {
            return false;
        }
        match self.last_event_counter {
            None => true,
            Some(last) => {
                let diff = header.event_counter().wrapping_sub(last) & EVENT_COUNTER_MASK;
                diff < MAX_COUNTER_JUMP || (EVENT_COUNTER_MASK + 1 - diff) < MAX_COUNTER_JUMP
            }
        }
    }

    /// Scan forward byte by byte from just after a bad header start for the next sane
    /// header. Leaves the reader positioned after that header.
    fn resync(&mut self, bad_start: u64) -> Result<Option<RecordHeader>, CaenFileError> {
        let scan_start = bad_start + 1;
        self.reader.seek(SeekFrom::Start(scan_start))?;
        let mut window = Vec::new();
        (&mut self.reader)
            .take(MAX_RESYNC_BYTES + HEADER_SIZE_BYTES as u64)
            .read_to_end(&mut window)?;

        let header_len = HEADER_SIZE_BYTES as usize;
        let mut offset = 0;
        while offset + header_len <= window.len() && (offset as u64) <= MAX_RESYNC_BYTES {
            let header = self.decode_header(&window[offset..offset + header_len]);
            if self.is_sane(&header) {
                let found = scan_start + offset as u64;
                log::warn!(
                    "Skipped {} bytes of malformed data between byte {} and byte {}",
                    found - bad_start,
                    bad_start,
                    found
                );
                self.position = found + HEADER_SIZE_BYTES as u64;
                self.reader.seek(SeekFrom::Start(self.position))?;
                return Ok(Some(header));
            }
            offset += 1;
        }

        log::warn!(
            "Could not find a good header within {} bytes of byte {}; treating as end of file",
            MAX_RESYNC_BYTES,
            bad_start
        );
        Ok(None)
    }

    /// Undo the per-board rollover of the trigger time tag
    fn correct_time_tag(&mut self, header: &RecordHeader) -> u64 {
        let board_id = header.board_id();
        let (tag, period) = if self.extended_time_tag {
            (
                ((header.pattern() as u64) << 32) + header.time_tag() as u64,
                EXTENDED_TIME_TAG_ROLLOVER,
            )
        } else {
            ((header.time_tag() & TIME_TAG_MASK) as u64, TIME_TAG_ROLLOVER)
        };

        let last = self.last_time_tag.entry(board_id).or_insert(0);
        let rollovers = self.rollovers.entry(board_id).or_insert(0);
        if tag < *last {
            *rollovers += 1;
        }
        *last = tag;
        tag + *rollovers * period
    }

    /// Read the next record.
    ///
    /// Returns a `Result<Option<Trigger>>`. The Option is None at the end of the file.
    pub fn get_next_trigger(&mut self) -> Result<Option<Trigger>, CaenFileError> {
        let start = self.position;
        let mut header_bytes = [0u8; HEADER_SIZE_BYTES as usize];
        if !self.read_bytes(&mut header_bytes)? {
            return Ok(None);
        }
        let mut header = self.decode_header(&header_bytes);
        let mut record_start = start;
        if !self.is_sane(&header) {
            log::warn!(
                "Record at byte {} did not pass the sanity check: {:#010x} {:#010x} {:#010x} {:#010x}",
                start,
                header.words[0],
                header.words[1],
                header.words[2],
                header.words[3]
            );
            match self.resync(start)? {
                Some(good) => {
                    header = good;
                    record_start = self.position - HEADER_SIZE_BYTES as u64;
                }
                None => return Ok(None),
            }
        }

        let board_id = header.board_id();
        if header.event_size_words() * 4 < HEADER_SIZE_BYTES {
            return Err(CaenFileError::BadEventSize(
                record_start,
                header.event_size_words(),
            ));
        }
        if header.is_zle() {
            return Err(CaenFileError::UnsupportedZle(board_id, record_start));
        }
        let mask = header.channel_mask();
        let n_channels = mask.count_ones() as usize;
        if n_channels == 0 {
            return Err(CaenFileError::EmptyChannelMask(board_id, record_start));
        }

        let payload_bytes = (header.event_size_words() * 4 - HEADER_SIZE_BYTES) as usize;
        let record_length = payload_bytes / (2 * n_channels);
        let mut payload = vec![0u8; payload_bytes];
        if !self.read_bytes(&mut payload)? {
            log::warn!(
                "Record at byte {} from board {} is truncated by the end of the file",
                record_start,
                board_id
            );
            return Ok(None);
        }

        let mut trigger = Trigger::new(
            header.event_counter(),
            board_id,
            self.correct_time_tag(&header),
        );
        trigger.file_position = record_start;

        let mut insane = false;
        let mut chunks = payload.chunks_exact(2);
        for channel in 0..NUMBER_OF_CHANNELS {
            if mask & (1 << channel) == 0 {
                continue;
            }
            let mut samples = Vec::with_capacity(record_length);
            for chunk in chunks.by_ref().take(record_length) {
                let raw = self.decode_u16(chunk);
                insane |= raw & !SAMPLE_MASK != 0;
                samples.push((raw & SAMPLE_MASK) as i16);
            }
            trigger.traces.push(BoardTrace { channel, samples });
        }
        if insane {
            log::warn!(
                "Event counter {} from board {} (byte {}) has samples with bits above the ADC range",
                trigger.event_counter,
                board_id,
                record_start
            );
        }

        self.last_event_counter = Some(trigger.event_counter);
        self.trigger_counter += 1;
        Ok(Some(trigger))
    }
}

impl<R: Read + Seek> TriggerSource for CaenReader<R> {
    fn next_trigger(&mut self) -> Result<Option<Trigger>, CaenFileError> {
        self.get_next_trigger()
    }

    fn bytes_read(&self) -> u64 {
        self.position
    }

    fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Cursor;

    /// Encode one non-ZLE V1730 record
    fn encode_record<B: ByteOrder>(
        buffer: &mut Vec<u8>,
        board_id: u8,
        counter: u32,
        time_tag: u32,
        traces: &[(u8, Vec<u16>)],
    ) {
        let n_samples: usize = traces.iter().map(|(_, s)| s.len()).sum();
        let size_words = 4 + (n_samples * 2) as u32 / 4;
        let mask: u32 = traces.iter().fold(0, |m, (ch, _)| m | (1 << ch));
        let w0 = HEADER_MARKER | size_words;
        let w1 = ((board_id as u32) << BOARD_ID_SHIFT) | (mask & 0xFF);
        let w2 = ((mask & 0xFF00) << 16) | counter;
        for word in [w0, w1, w2, time_tag] {
            buffer.write_u32::<B>(word).unwrap();
        }
        for (_, samples) in traces {
            for s in samples {
                buffer.write_u16::<B>(*s).unwrap();
            }
        }
    }

    fn reader(buffer: Vec<u8>, software: DaqSoftware) -> CaenReader<Cursor<Vec<u8>>> {
        let len = buffer.len() as u64;
        CaenReader::new(Cursor::new(buffer), len, software, false)
    }

    #[test]
    fn test_read_records() {
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(
            &mut buffer,
            1,
            7,
            1000,
            &[(0, vec![10, 11, 12, 13]), (9, vec![20, 21, 22, 23])],
        );
        encode_record::<LittleEndian>(&mut buffer, 2, 7, 1004, &[(3, vec![1, 2])]);
        let total = buffer.len() as u64;
        let mut file = reader(buffer, DaqSoftware::ToolDaq);

        let first = file.get_next_trigger().unwrap().unwrap();
        assert_eq!(first.board_id, 1);
        assert_eq!(first.event_counter, 7);
        assert_eq!(first.trigger_time_tag, 1000);
        assert_eq!(first.file_position, 0);
        assert_eq!(first.traces.len(), 2);
        assert_eq!(first.traces[1].channel, 9);
        assert_eq!(first.traces[1].samples, vec![20, 21, 22, 23]);

        let second = file.get_next_trigger().unwrap().unwrap();
        assert_eq!(second.board_id, 2);
        assert_eq!(second.traces[0].samples, vec![1, 2]);

        assert!(file.get_next_trigger().unwrap().is_none());
        assert_eq!(file.bytes_read(), total);
        assert_eq!(file.trigger_counter(), 2);
    }

    #[test]
    fn test_big_endian() {
        let mut buffer = Vec::new();
        encode_record::<BigEndian>(&mut buffer, 3, 42, 5, &[(15, vec![100, 200])]);
        let mut file = reader(buffer, DaqSoftware::LabView);
        let trigger = file.get_next_trigger().unwrap().unwrap();
        assert_eq!(trigger.board_id, 3);
        assert_eq!(trigger.event_counter, 42);
        assert_eq!(trigger.traces[0].channel, 15);
        assert_eq!(trigger.traces[0].samples, vec![100, 200]);
    }

    #[test]
    fn test_time_tag_rollover() {
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 1, 0x7FFF_FFF0, &[(0, vec![0, 0])]);
        encode_record::<LittleEndian>(&mut buffer, 2, 1, 0x10, &[(0, vec![0, 0])]);
        // The rollover bit is dropped before comparing
        encode_record::<LittleEndian>(&mut buffer, 1, 2, 0x8000_0010, &[(0, vec![0, 0])]);
        let mut file = reader(buffer, DaqSoftware::ToolDaq);
        assert_eq!(file.get_next_trigger().unwrap().unwrap().trigger_time_tag, 0x7FFF_FFF0);
        // Board 2 has its own history
        assert_eq!(file.get_next_trigger().unwrap().unwrap().trigger_time_tag, 0x10);
        assert_eq!(
            file.get_next_trigger().unwrap().unwrap().trigger_time_tag,
            0x10 + TIME_TAG_ROLLOVER
        );
    }

    #[test]
    fn test_sample_masking() {
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 1, 0, &[(0, vec![0xC001, 0x3FFF])]);
        let mut file = reader(buffer, DaqSoftware::ToolDaq);
        let trigger = file.get_next_trigger().unwrap().unwrap();
        assert_eq!(trigger.traces[0].samples, vec![1, 0x3FFF]);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 5, 0, &[(0, vec![1, 2])]);
        buffer.extend_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
        let good_start = buffer.len() as u64;
        encode_record::<LittleEndian>(&mut buffer, 2, 5, 0, &[(0, vec![3, 4])]);
        let mut file = reader(buffer, DaqSoftware::ToolDaq);

        assert_eq!(file.get_next_trigger().unwrap().unwrap().board_id, 1);
        let recovered = file.get_next_trigger().unwrap().unwrap();
        assert_eq!(recovered.board_id, 2);
        assert_eq!(recovered.file_position, good_start);
        assert_eq!(recovered.traces[0].samples, vec![3, 4]);
        assert!(file.get_next_trigger().unwrap().is_none());
    }

    #[test]
    fn test_zle_rejected() {
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 1, 0, &[(0, vec![1, 2])]);
        // Flip the ZLE flag in word 1
        let mut w1 = LittleEndian::read_u32(&buffer[4..8]);
        w1 |= ZLE_FLAG;
        LittleEndian::write_u32(&mut buffer[4..8], w1);
        let mut file = reader(buffer, DaqSoftware::ToolDaq);
        assert!(matches!(
            file.get_next_trigger(),
            Err(CaenFileError::UnsupportedZle(1, 0))
        ));
    }

    #[test]
    fn test_truncated_record_ends_stream() {
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 1, 0, &[(0, vec![1, 2, 3, 4])]);
        buffer.truncate(buffer.len() - 2);
        let mut file = reader(buffer, DaqSoftware::ToolDaq);
        assert!(file.get_next_trigger().unwrap().is_none());
    }

    #[test]
    fn test_extended_time_tag() {
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 1, 0xFFFF_FFF0, &[(0, vec![0, 0])]);
        encode_record::<LittleEndian>(&mut buffer, 1, 2, 0x10, &[(0, vec![0, 0])]);
        // Pattern bits 0x0001 on the first record only
        let mut w1 = LittleEndian::read_u32(&buffer[4..8]);
        w1 |= 1 << PATTERN_SHIFT;
        LittleEndian::write_u32(&mut buffer[4..8], w1);
        let len = buffer.len() as u64;
        let mut file = CaenReader::new(Cursor::new(buffer), len, DaqSoftware::ToolDaq, true);

        let first = file.get_next_trigger().unwrap().unwrap();
        // The full 32-bit word is kept; no 31-bit mask
        assert_eq!(first.trigger_time_tag, (1u64 << 32) + 0xFFFF_FFF0);
        let second = file.get_next_trigger().unwrap().unwrap();
        assert_eq!(second.trigger_time_tag, 0x10 + EXTENDED_TIME_TAG_ROLLOVER);
    }

    #[test]
    fn test_resync_skips_header_with_distant_counter() {
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 5, 0, &[(0, vec![1, 2])]);
        // Well formed, but its counter is far from the last good one
        encode_record::<LittleEndian>(&mut buffer, 3, 500, 0, &[(0, vec![7, 8])]);
        let good_start = buffer.len() as u64;
        encode_record::<LittleEndian>(&mut buffer, 2, 6, 0, &[(0, vec![3, 4])]);
        let mut file = reader(buffer, DaqSoftware::ToolDaq);

        assert_eq!(file.get_next_trigger().unwrap().unwrap().event_counter, 5);
        let recovered = file.get_next_trigger().unwrap().unwrap();
        assert_eq!(recovered.board_id, 2);
        assert_eq!(recovered.event_counter, 6);
        assert_eq!(recovered.file_position, good_start);
        assert!(file.get_next_trigger().unwrap().is_none());
        assert_eq!(file.trigger_counter(), 2);
    }

    #[test]
    fn test_resync_gives_up_after_limit() {
        // Just inside the scan limit the next record is still found
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 1, 0, &[(0, vec![1, 2])]);
        buffer.resize(buffer.len() + 64000, 0);
        encode_record::<LittleEndian>(&mut buffer, 2, 1, 0, &[(0, vec![3, 4])]);
        let mut file = reader(buffer, DaqSoftware::ToolDaq);
        assert_eq!(file.get_next_trigger().unwrap().unwrap().board_id, 1);
        assert_eq!(file.get_next_trigger().unwrap().unwrap().board_id, 2);

        // Past it the stream ends even though a good record follows
        let mut buffer = Vec::new();
        encode_record::<LittleEndian>(&mut buffer, 1, 1, 0, &[(0, vec![1, 2])]);
        buffer.resize(buffer.len() + MAX_RESYNC_BYTES as usize + 100, 0);
        encode_record::<LittleEndian>(&mut buffer, 2, 1, 0, &[(0, vec![3, 4])]);
        let mut file = reader(buffer, DaqSoftware::ToolDaq);
        assert_eq!(file.get_next_trigger().unwrap().unwrap().board_id, 1);
        assert!(file.get_next_trigger().unwrap().is_none());
        assert_eq!(file.trigger_counter(), 1);
    }
}
