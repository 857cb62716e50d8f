/*!
Courses, enrollments, and the occupancy projection built from them.
*/
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Maximum number of students admitted. Always positive.
    pub capacity: i32,
    /// `id` of the single owning teacher.
    pub teacher: i64,
}

/**
A partial update to a course, as deserialized from an admin request.

Absent fields are left alone. Lowering `capacity` below the current
enrollment count is allowed; nobody already enrolled gets evicted, and
the course simply shows up as overbooked in occupancy listings.
*/
#[derive(Debug, Default, Deserialize)]
pub struct CoursePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<i32>,
    pub teacher: Option<i64>,
}

impl CoursePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.capacity.is_none()
            && self.teacher.is_none()
    }
}

/**
One student's seat in one course.

The `(student, course)` pair is unique; `grade` is whatever scalar the
teacher typed in ("92.5", "A-", ...), or `None` before anything has
been assigned. Interpreting the text is the front end's problem.
*/
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Enrollment {
    pub id: i64,
    pub student: i64,
    pub course: i64,
    pub grade: Option<String>,
}

/// One line of a student's dashboard: a course they hold a seat in,
/// who teaches it, and the grade so far.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub course_id: i64,
    pub course_name: String,
    pub teacher_name: String,
    pub grade: Option<String>,
}

/// One line of a course roster: a seated student and their grade.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RosterEntry {
    pub student_id: i64,
    pub student_name: String,
    pub grade: Option<String>,
}

/// A course together with its current headcount, for catalog and
/// dashboard listings.
#[derive(Clone, Debug, Serialize)]
pub struct Occupancy {
    pub course: Course,
    pub teacher_name: String,
    pub enrolled: i64,
}

impl Occupancy {
    /// True when more students hold seats than the course admits.
    /// Possible after an admin lowers the capacity of a full course.
    pub fn overbooked(&self) -> bool {
        self.enrolled > self.course.capacity as i64
    }

    pub fn seats_left(&self) -> i64 {
        let n = self.course.capacity as i64 - self.enrolled;
        if n < 0 { 0 } else { n }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupancy(capacity: i32, enrolled: i64) -> Occupancy {
        Occupancy {
            course: Course {
                id: 1,
                name: "Data Structures".to_owned(),
                description: None,
                capacity,
                teacher: 5,
            },
            teacher_name: "A. Hepworth".to_owned(),
            enrolled,
        }
    }

    #[test]
    fn occupancy_accounting() {
        let occ = occupancy(30, 12);
        assert!(!occ.overbooked());
        assert_eq!(occ.seats_left(), 18);

        let full = occupancy(30, 30);
        assert!(!full.overbooked());
        assert_eq!(full.seats_left(), 0);

        // Capacity lowered under the headcount after the fact.
        let over = occupancy(10, 12);
        assert!(over.overbooked());
        assert_eq!(over.seats_left(), 0);
    }

    #[test]
    fn empty_patch() {
        assert!(CoursePatch::default().is_empty());
        let p = CoursePatch { capacity: Some(12), ..Default::default() };
        assert!(!p.is_empty());
    }
}
