use std::alloc::Layout;
use std::cell::RefCell;
use std::mem::size_of;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;

use packed_array::{
    BaseAlloc, Error, ErrorKind, Global, NoHeader, PackedLayout, PackedPtr, allocate_bytes,
    allocate_bytes_in, allocate_count, allocate_count_in, begin, count, end,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Element(i32),
    Header,
    Allocate(usize),
    Release(usize),
}

thread_local! {
    static EVENTS: RefCell<Vec<Event>> = const { RefCell::new(Vec::new()) };
}

fn record(event: Event) {
    EVENTS.with(|events| events.borrow_mut().push(event));
}

fn take_events() -> Vec<Event> {
    EVENTS.with(|events| std::mem::take(&mut *events.borrow_mut()))
}

/// `i32` element that logs its value when dropped.
#[derive(Debug, Clone)]
struct Probe(i32);

impl Drop for Probe {
    fn drop(&mut self) {
        record(Event::Element(self.0));
    }
}

/// Zero-sized header that logs when dropped.
struct Marker;

impl Drop for Marker {
    fn drop(&mut self) {
        record(Event::Header);
    }
}

#[allow(dead_code)]
#[repr(C)]
struct Probed {
    marker: Marker,
    elements: [Probe; 1],
}

unsafe impl PackedLayout for Probed {
    type Header = Marker;
    type Element = Probe;
    type Iterated = Probe;
}

#[derive(Clone, Copy, Default)]
struct Recording;

unsafe impl BaseAlloc for Recording {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        record(Event::Allocate(layout.size()));
        Global.allocate(layout)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        record(Event::Release(layout.size()));
        unsafe { Global.release(ptr, layout) }
    }
}

struct Refusing;

unsafe impl BaseAlloc for Refusing {
    fn allocate(&self, _layout: Layout) -> Option<NonNull<u8>> {
        None
    }

    unsafe fn release(&self, _ptr: NonNull<u8>, _layout: Layout) {
        panic!("nothing was allocated");
    }
}

/// Hands out blocks filled with `0xAB`, so unwritten slots are recognizable.
struct Filling;

unsafe impl BaseAlloc for Filling {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let block = Global.allocate(layout)?;
        unsafe { block.as_ptr().write_bytes(0xAB, layout.size()) };
        Some(block)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { Global.release(ptr, layout) }
    }
}

#[repr(C)]
struct BlockHeader {
    rate: u32,
    channels: u32,
}

#[repr(C)]
struct Block {
    header: BlockHeader,
    samples: [f32; 1],
}

unsafe impl PackedLayout for Block {
    type Header = BlockHeader;
    type Element = f32;
    type Iterated = f32;
}

/// Header with a destructor in front of a non-trivial element.
#[allow(dead_code)]
#[repr(C)]
struct LoudHeader {
    id: i32,
}

impl Drop for LoudHeader {
    fn drop(&mut self) {
        record(Event::Header);
    }
}

#[allow(dead_code)]
#[repr(C)]
struct Loud {
    header: LoudHeader,
    elements: [Probe; 1],
}

unsafe impl PackedLayout for Loud {
    type Header = LoudHeader;
    type Element = Probe;
    type Iterated = Probe;
}

/// Element with a destructor, exposed to readers as a plain `f32`.
#[repr(transparent)]
struct Counted(f32);

impl Drop for Counted {
    fn drop(&mut self) {
        record(Event::Element(self.0 as i32));
    }
}

#[allow(dead_code)]
#[repr(C)]
struct Gains {
    header: NoHeader,
    gains: [Counted; 1],
}

unsafe impl PackedLayout for Gains {
    type Header = NoHeader;
    type Element = Counted;
    type Iterated = f32;
}

fn probed(count: usize) -> PackedPtr<Probed, Recording> {
    allocate_count_in::<Probed, _>(count, Recording).init(|_| Marker, |i| Probe(i as i32))
}

fn expected_teardown(count: usize) -> Vec<Event> {
    let mut expected: Vec<Event> = (0..count as i32).rev().map(Event::Element).collect();
    expected.push(Event::Header);
    expected.push(Event::Release(size_of::<i32>() * count.max(1)));
    expected
}

#[test]
fn test_five_elements_scenario() {
    take_events();
    let ptr = allocate_count_in::<Probed, _>(5, Recording)
        .init(|_| Marker, |i| Probe(10 * (i as i32 + 1)));
    assert_eq!(ptr.count(), 5);

    let values: Vec<i32> = ptr.iter().map(|p| p.0).collect();
    assert_eq!(values, vec![10, 20, 30, 40, 50]);
    assert_eq!(take_events(), vec![Event::Allocate(20)]);

    drop(ptr);
    assert_eq!(
        take_events(),
        vec![
            Event::Element(50),
            Event::Element(40),
            Event::Element(30),
            Event::Element(20),
            Event::Element(10),
            Event::Header,
            Event::Release(20),
        ]
    );
}

#[test]
fn test_teardown_order_for_many_counts() {
    fastrand::seed(20240817);
    let mut counts = vec![0, 1, 2, 3];
    counts.extend((0..20).map(|_| fastrand::usize(4..500)));
    for n in counts {
        take_events();
        let ptr = probed(n);
        assert_eq!(count(&ptr), n);
        take_events();
        drop(ptr);
        assert_eq!(take_events(), expected_teardown(n), "count {n}");
    }
}

#[test]
fn test_count_matches_request() {
    for n in [0usize, 1, 7, 64, 1000] {
        let ptr = allocate_count::<u16>(n).init(|_| NoHeader, |i| i as u16);
        assert_eq!(ptr.count(), n);
        assert_eq!(ptr.len(), n);
        assert_eq!(ptr.is_empty(), n == 0);
        assert!(!ptr.is_null());
    }
}

#[test]
fn test_begin_plus_count_is_end() {
    for n in [0usize, 1, 13] {
        let ptr = allocate_count::<u64>(n).init(|_| NoHeader, |i| i as u64);
        assert!(!begin(&ptr).is_null());
        assert_eq!(unsafe { begin(&ptr).add(count(&ptr)) }, end(&ptr));
    }

    let block = allocate_count::<Block>(6).init(|_| BlockHeader { rate: 1, channels: 2 }, |_| 0.0);
    assert_eq!(unsafe { block.begin().add(block.count()) }, block.end());
}

#[test]
fn test_begin_skips_non_empty_header() {
    let block = allocate_count::<Block>(3).init(
        |_| BlockHeader {
            rate: 44_100,
            channels: 2,
        },
        |i| i as f32,
    );
    let base = block.as_ptr() as usize;
    assert_eq!(block.begin() as usize, base + size_of::<BlockHeader>());
}

#[test]
fn test_begin_of_empty_header_is_base() {
    let ptr = allocate_count::<i32>(3).init(|_| NoHeader, |i| i as i32);
    assert_eq!(ptr.begin() as usize, ptr.as_ptr() as usize);
}

#[test]
fn test_null_pointer() {
    let ptr = PackedPtr::<i32>::null();
    assert!(ptr.is_null());
    assert_eq!(ptr.count(), 0);
    assert!(begin(&ptr).is_null());
    assert!(end(&ptr).is_null());
    assert!(ptr.as_slice().is_empty());
    assert!(ptr.header().is_none());
    assert!(ptr.get().is_none());
    assert_eq!(ptr.iter().count(), 0);

    let default = PackedPtr::<Block>::default();
    assert!(default.is_null());
    assert_eq!(default.count(), 0);
}

#[test]
fn test_take_moves_ownership_once() {
    take_events();
    let mut a = probed(3);
    take_events();

    let b = a.take();
    assert!(a.is_null());
    assert_eq!(a.count(), 0);
    assert_eq!(b.count(), 3);

    drop(a);
    assert!(take_events().is_empty());

    drop(b);
    assert_eq!(take_events(), expected_teardown(3));
}

#[test]
fn test_plain_move_keeps_single_teardown() {
    take_events();
    let a = probed(2);
    let b = a;
    let c = Some(b);
    take_events();
    drop(c);
    assert_eq!(take_events(), expected_teardown(2));
}

#[test]
fn test_reset_destroys_once() {
    take_events();
    let mut ptr = probed(2);
    take_events();

    ptr.reset();
    assert_eq!(take_events(), expected_teardown(2));
    assert!(ptr.is_null());
    assert_eq!(ptr.count(), 0);

    ptr.reset();
    drop(ptr);
    assert!(take_events().is_empty());
}

#[test]
fn test_non_empty_header_keeps_one_element() {
    let block = allocate_count::<Block>(0).init(|_| BlockHeader { rate: 8_000, channels: 1 }, |_| 1.5);
    assert!(block.count() >= 1);
    assert_eq!(block[0], 1.5);
}

#[test]
fn test_empty_header_allows_zero_elements() {
    take_events();
    let ptr = probed(0);
    assert_eq!(ptr.count(), 0);
    assert!(!ptr.is_null());
    assert_eq!(begin(&ptr), end(&ptr));
    drop(ptr);
    assert_eq!(
        take_events(),
        vec![Event::Allocate(4), Event::Header, Event::Release(4)]
    );
}

#[test]
fn test_get_without_elements_is_none() {
    let mut ptr = allocate_count_in::<i32, _>(0, Filling).init(|_| NoHeader, |_| unreachable!());
    assert!(!ptr.is_null());
    assert_eq!(ptr.count(), 0);
    assert!(ptr.get().is_none());
    assert!(ptr.get_mut().is_none());
    assert!(ptr.as_slice().is_empty());

    let mut ptr = allocate_count_in::<i32, _>(1, Filling).init(|_| NoHeader, |_| 17);
    assert_eq!(ptr.get(), Some(&17));
    *ptr.get_mut().unwrap() = 18;
    assert_eq!(ptr[0], 18);
}

#[test]
fn test_take_with_borrowed_allocator() {
    take_events();
    let recording = Recording;
    let mut a = allocate_count_in::<Probed, _>(2, &recording).init(|_| Marker, |i| Probe(i as i32));
    take_events();

    let b = a.take();
    assert!(a.is_null());
    assert_eq!(b.count(), 2);

    drop(a);
    assert!(take_events().is_empty());
    drop(b);
    assert_eq!(take_events(), expected_teardown(2));
}

#[test]
fn test_allocate_bytes_zero_is_type_size() {
    let ptr = allocate_bytes::<Block>(0).init(|_| BlockHeader { rate: 1, channels: 1 }, |_| 0.0);
    assert_eq!(ptr.count(), 1);
    assert_eq!(
        allocate_bytes::<Block>(0).size().unwrap(),
        size_of::<Block>()
    );

    take_events();
    let ptr = allocate_bytes_in::<Probed, _>(0, Recording).init(|_| Marker, |i| Probe(i as i32));
    assert_eq!(ptr.count(), 1);
    drop(ptr);
    assert_eq!(take_events()[0], Event::Allocate(size_of::<Probed>()));
}

#[test]
fn test_allocate_bytes_rounds_up_to_whole_elements() {
    let plan = allocate_bytes::<u32>(10);
    assert_eq!(plan.count(), 3);
    assert_eq!(plan.size().unwrap(), 12);

    let block = allocate_bytes::<Block>(8 + 4 * 5).init(|_| BlockHeader { rate: 1, channels: 1 }, |_| 0.0);
    assert_eq!(block.count(), 5);
}

#[test]
fn test_header_access() {
    let mut block = allocate_count::<Block>(2).init(
        |count| BlockHeader {
            rate: 48_000,
            channels: count as u32,
        },
        |_| 0.0,
    );
    let header = block.header().unwrap();
    assert_eq!(header.rate, 48_000);
    assert_eq!(header.channels, 2);

    block.header_mut().unwrap().rate = 96_000;
    assert_eq!(block.get().unwrap().header.rate, 96_000);
    assert_eq!(block.get().unwrap().samples[0], 0.0);
}

#[test]
fn test_mutation_through_index_and_iter() {
    let mut ptr = allocate_count::<f32>(4).init_with(|_| NoHeader, 1.0);
    ptr[2] = 5.0;
    for value in &mut ptr {
        *value *= 2.0;
    }
    assert_eq!(ptr.as_slice(), &[2.0, 2.0, 10.0, 2.0]);
    assert_eq!(unsafe { *ptr.get_unchecked(2) }, 10.0);

    unsafe { *ptr.get_unchecked_mut(0) = -1.0 };
    let collected: Vec<f32> = (&ptr).into_iter().copied().collect();
    assert_eq!(collected, vec![-1.0, 2.0, 10.0, 2.0]);
}

#[test]
fn test_iteration_is_repeatable() {
    let ptr = allocate_count::<u8>(5).init(|_| NoHeader, |i| i as u8);
    let first: Vec<u8> = ptr.iter().copied().collect();
    let second: Vec<u8> = ptr.iter().copied().collect();
    assert_eq!(first, second);
    assert_eq!(ptr.as_bytes(), &[0, 1, 2, 3, 4]);
}

#[test]
#[should_panic(expected = "index out of bounds")]
fn test_index_out_of_range_panics() {
    let ptr = allocate_count::<i32>(2).init(|_| NoHeader, |_| 0);
    let _value: i32 = ptr[2];
}

#[test]
#[should_panic(expected = "indexing a null PackedPtr")]
fn test_index_null_panics() {
    let ptr = PackedPtr::<i32>::null();
    let _value: i32 = ptr[0];
}

#[test]
fn test_iterated_view_differs_from_element() {
    take_events();
    let gains = allocate_count::<Gains>(3).init(|_| NoHeader, |i| Counted(i as f32 + 1.0));
    assert_eq!(gains.as_slice(), &[1.0, 2.0, 3.0]);
    assert_eq!(gains.as_bytes().len(), 12);
    drop(gains);
    assert_eq!(
        take_events(),
        vec![Event::Element(3), Event::Element(2), Event::Element(1)]
    );
}

#[test]
fn test_try_init_success() {
    let ptr = allocate_count::<i64>(4)
        .try_init::<Error, _, _>(|_| Ok(NoHeader), |i| Ok(i as i64 * 3))
        .unwrap();
    assert_eq!(ptr.as_slice(), &[0, 3, 6, 9]);
}

#[test]
fn test_element_failure_unwinds_built_elements() {
    take_events();
    let result = allocate_count_in::<Loud, _>(6, Recording).try_init(
        |_| Ok(LoudHeader { id: 7 }),
        |i| {
            if i == 3 {
                Err(Error::invalid_arg("index", "three is rejected"))
            } else {
                Ok(Probe(i as i32))
            }
        },
    );
    let err = result.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    assert_eq!(
        take_events(),
        vec![
            Event::Allocate(28),
            Event::Element(2),
            Event::Element(1),
            Event::Element(0),
            Event::Header,
            Event::Release(28),
        ]
    );
}

#[test]
fn test_header_failure_only_releases() {
    take_events();
    let result = allocate_count_in::<Loud, _>(2, Recording).try_init(
        |_| Err(Error::invalid_arg("header", "rejected")),
        |i| Ok(Probe(i as i32)),
    );
    assert!(result.is_err());
    assert_eq!(
        take_events(),
        vec![Event::Allocate(12), Event::Release(12)]
    );
}

#[test]
fn test_panicking_element_unwinds() {
    take_events();
    let result = catch_unwind(AssertUnwindSafe(|| {
        allocate_count_in::<Probed, _>(4, Recording).init(
            |_| Marker,
            |i| {
                if i == 2 {
                    panic!("element constructor failed");
                }
                Probe(i as i32)
            },
        )
    }));
    assert!(result.is_err());
    assert_eq!(
        take_events(),
        vec![
            Event::Allocate(16),
            Event::Element(1),
            Event::Element(0),
            Event::Header,
            Event::Release(16),
        ]
    );
}

#[test]
fn test_try_init_reports_out_of_memory() {
    let result = allocate_count_in::<u32, _>(16, Refusing)
        .try_init::<Error, _, _>(|_| Ok(NoHeader), |i| Ok(i as u32));
    let err = result.unwrap_err();
    assert!(err.is_out_of_memory());
}

#[test]
fn test_try_init_reports_capacity_overflow() {
    let result = allocate_count::<u64>(usize::MAX / 2)
        .try_init::<Error, _, _>(|_| Ok(NoHeader), |i| Ok(i as u64));
    let err = result.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CapacityOverflow { .. }));
}

#[test]
fn test_construction_error_wraps_source() {
    let source = std::io::Error::other("sample source unavailable");
    let err = Error::construction("element 4", source);
    assert!(matches!(err.kind(), ErrorKind::Construction { .. }));
    assert!(err.to_string().contains("element 4"));
}

#[test]
fn test_send_to_another_thread() {
    let ptr = allocate_count::<f64>(8).init(|_| NoHeader, |i| i as f64);
    let sum = std::thread::spawn(move || ptr.iter().sum::<f64>())
        .join()
        .unwrap();
    assert_eq!(sum, 28.0);
}

#[test]
fn test_debug_output() {
    let ptr = allocate_count::<u8>(3).init(|_| NoHeader, |_| 0);
    let text = format!("{ptr:?}");
    assert!(text.contains("PackedPtr"));
    assert!(text.contains("count: 3"));
    assert!(format!("{:?}", allocate_count::<u8>(2)).contains("count: 2"));
}
